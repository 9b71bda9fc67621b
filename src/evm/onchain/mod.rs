/// Narrow interface to the execution node
pub mod endpoints;

use serde::{Deserialize, Serialize};

use super::{
    abi::TypedValue,
    contract_utils::CallableMember,
    trace::TraceStep,
    types::{EVMAddress, EVMU256, TxHash},
};

/// A deployed contract instance. Dropped at the end of the round that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceHandle {
    pub address: EVMAddress,
    pub deploy_tx: Option<TxHash>,
}

/// Outcome of a submitted call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallReceipt {
    /// `None` when the node rejected the transaction as reverting before mining it
    pub tx: Option<TxHash>,
    pub success: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionTrace {
    /// The node reports the top-level execution as failed
    pub failed: bool,
    pub steps: Vec<TraceStep>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RpcError {
    #[error("cannot connect to node: {0}")]
    Connect(String),
    #[error("request timed out: {0}")]
    Timeout(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("node returned error {code}: {message}")]
    Node { code: i64, message: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl RpcError {
    /// Connectivity failures that are worth retrying
    pub fn is_transient(&self) -> bool {
        matches!(self, RpcError::Connect(_) | RpcError::Timeout(_) | RpcError::Transport(_))
    }

    /// The node refused the transaction because execution reverts
    pub fn is_revert(&self) -> bool {
        match self {
            RpcError::Node { message, .. } => message.to_lowercase().contains("revert"),
            _ => false,
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DeployError {
    #[error("deployment failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("constructor reverted")]
    Reverted { tx: Option<TxHash> },
    #[error("receipt of {0} carries no contract address")]
    NoContractAddress(TxHash),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    #[error("call failed: {0}")]
    Rpc(#[from] RpcError),
}

impl CallError {
    pub fn is_transient(&self) -> bool {
        match self {
            CallError::Rpc(e) => e.is_transient(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TraceUnavailableError {
    #[error("trace request failed: {0}")]
    Rpc(#[from] RpcError),
    #[error("node does not support tracing: {0}")]
    Unsupported(String),
    #[error("malformed trace: {0}")]
    Malformed(String),
}

impl TraceUnavailableError {
    pub fn is_transient(&self) -> bool {
        match self {
            TraceUnavailableError::Rpc(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Everything the fuzzer needs from a node. Implementations serialize submissions
/// per sending account so concurrent rounds never race on nonces.
pub trait ChainClient: Send + Sync {
    /// Accounts the node signs for, deployer first
    fn accounts(&self) -> Result<Vec<EVMAddress>, RpcError>;

    fn deploy(
        &self,
        bytecode: &[u8],
        constructor_args: &[TypedValue],
        value: EVMU256,
        from: EVMAddress,
    ) -> Result<InstanceHandle, DeployError>;

    fn call(
        &self,
        instance: &InstanceHandle,
        member: &CallableMember,
        args: &[TypedValue],
        value: EVMU256,
        from: EVMAddress,
    ) -> Result<CallReceipt, CallError>;

    fn fetch_trace(&self, tx: &TxHash) -> Result<ExecutionTrace, TraceUnavailableError>;
}
