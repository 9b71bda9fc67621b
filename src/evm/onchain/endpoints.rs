/// JSON-RPC implementation of [`ChainClient`]
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::sleep,
    time::{Duration, Instant},
};

use retry::{retry, OperationResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    CallError, CallReceipt, ChainClient, DeployError, ExecutionTrace, InstanceHandle, RpcError,
    TraceUnavailableError,
};
use crate::evm::{
    abi::{encode_args, encode_call, TypedValue},
    contract_utils::CallableMember,
    trace::{TraceStep, STACK_WINDOW},
    types::{parse_address, parse_u256, EVMAddress, EVMU256, TxHash},
};

/// JSON-RPC "method not found"
const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RpcConfig {
    /// Per-request timeout
    pub timeout_ms: u64,
    /// Extra attempts after a connectivity failure
    pub retries: usize,
    /// First backoff delay; doubled on each further attempt
    pub retry_base_delay_ms: u64,
    pub receipt_poll_interval_ms: u64,
    pub receipt_timeout_ms: u64,
    /// Explicit gas limit for every transaction. When unset the node estimates it,
    /// which makes reverting calls fail at submission.
    pub gas_limit: Option<u64>,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 20_000,
            retries: 3,
            retry_base_delay_ms: 200,
            receipt_poll_interval_ms: 100,
            receipt_timeout_ms: 30_000,
            gas_limit: Some(8_000_000),
        }
    }
}

/// Which failures a request may be repeated after
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryMode {
    /// Reads: any connectivity failure
    Idempotent,
    /// Transaction submission: only when the request never reached the node
    Submission,
}

impl RetryMode {
    fn should_retry(&self, err: &RpcError) -> bool {
        match self {
            RetryMode::Idempotent => err.is_transient(),
            RetryMode::Submission => matches!(err, RpcError::Connect(_)),
        }
    }
}

fn hex_address(address: &EVMAddress) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

fn from_reqwest(e: reqwest::Error) -> RpcError {
    if e.is_timeout() {
        RpcError::Timeout(e.to_string())
    } else if e.is_connect() {
        RpcError::Connect(e.to_string())
    } else {
        RpcError::Transport(e.to_string())
    }
}

/// Extract `result` from a JSON-RPC response, or its error
pub fn parse_response(json: Value) -> Result<Value, RpcError> {
    if let Some(err) = json.get("error") {
        let code = err["code"].as_i64().unwrap_or_default();
        let mut message = err["message"].as_str().unwrap_or("unknown error").to_string();
        if let Some(data) = err.get("data").and_then(|d| d.as_str()) {
            message.push_str(&format!(" ({})", data));
        }
        return Err(RpcError::Node { code, message });
    }
    json.get("result")
        .cloned()
        .ok_or_else(|| RpcError::Malformed("response has neither result nor error".to_string()))
}

/// Convert a `debug_traceTransaction` struct-log result into trace steps
pub fn parse_struct_logs(result: &Value) -> Result<ExecutionTrace, TraceUnavailableError> {
    let logs = result["structLogs"]
        .as_array()
        .ok_or_else(|| TraceUnavailableError::Malformed("missing structLogs".to_string()))?;
    let mut steps = Vec::with_capacity(logs.len());
    for (idx, log) in logs.iter().enumerate() {
        let op = log["op"]
            .as_str()
            .ok_or_else(|| TraceUnavailableError::Malformed(format!("step {} has no op", idx)))?;
        let depth = log["depth"]
            .as_u64()
            .ok_or_else(|| TraceUnavailableError::Malformed(format!("step {} has no depth", idx)))?;
        let stack = match log["stack"].as_array() {
            Some(entries) => {
                let skip = entries.len().saturating_sub(STACK_WINDOW);
                entries[skip..]
                    .iter()
                    .map(|entry| {
                        entry.as_str().and_then(parse_u256).ok_or_else(|| {
                            TraceUnavailableError::Malformed(format!("step {} has a bad stack entry", idx))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?
            }
            None => vec![],
        };
        steps.push(TraceStep {
            pc: log["pc"].as_u64().unwrap_or_default(),
            op: op.to_string(),
            depth: depth as usize,
            stack,
        });
    }
    Ok(ExecutionTrace {
        failed: result["failed"].as_bool().unwrap_or(false),
        steps,
    })
}

pub struct RpcClient {
    pub endpoint_url: String,
    client: reqwest::blocking::Client,
    config: RpcConfig,
    request_id: AtomicU64,
    account_locks: Mutex<HashMap<EVMAddress, Arc<Mutex<()>>>>,
}

impl RpcClient {
    pub fn new(endpoint_url: String, config: RpcConfig) -> Result<Self, RpcError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(from_reqwest)?;
        Ok(Self {
            endpoint_url,
            client,
            config,
            request_id: AtomicU64::new(1),
            account_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Create a client and check the node answers
    pub fn connect(endpoint_url: String, config: RpcConfig) -> Result<Self, RpcError> {
        info!("Connecting to {}", endpoint_url);
        let client = Self::new(endpoint_url, config)?;
        let version = client.request("web3_clientVersion", json!([]), RetryMode::Idempotent)?;
        info!("Connected to {}", version.as_str().unwrap_or("unknown node"));
        Ok(client)
    }

    fn request_once(&self, method: &str, params: &Value) -> Result<Value, RpcError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({"jsonrpc": "2.0", "method": method, "params": params, "id": id});
        let resp = self
            .client
            .post(&self.endpoint_url)
            .json(&body)
            .send()
            .map_err(from_reqwest)?;
        let status = resp.status();
        let text = resp.text().map_err(from_reqwest)?;
        match serde_json::from_str::<Value>(&text) {
            Ok(json) => parse_response(json),
            Err(_) if status.is_server_error() => Err(RpcError::Transport(format!("HTTP {}", status))),
            Err(e) => Err(RpcError::Malformed(e.to_string())),
        }
    }

    fn request(&self, method: &str, params: Value, mode: RetryMode) -> Result<Value, RpcError> {
        let base = self.config.retry_base_delay_ms;
        let delays = (0..self.config.retries as u32).map(move |i| Duration::from_millis(base.saturating_mul(1 << i.min(16))));
        retry(delays, || match self.request_once(method, &params) {
            Ok(value) => OperationResult::Ok(value),
            Err(e) if mode.should_retry(&e) => {
                warn!("{} failed, retrying: {}", method, e);
                OperationResult::Retry(e)
            }
            Err(e) => OperationResult::Err(e),
        })
        .map_err(|e| e.error)
    }

    fn account_lock(&self, account: EVMAddress) -> Arc<Mutex<()>> {
        let mut locks = self.account_locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(account).or_default().clone()
    }

    /// Submit a transaction and wait for its receipt, holding the sender's lock
    /// throughout so the node hands out nonces in submission order.
    fn transact(
        &self,
        from: EVMAddress,
        to: Option<EVMAddress>,
        data: &[u8],
        value: EVMU256,
    ) -> Result<(TxHash, Value), RpcError> {
        let mut tx = json!({
            "from": hex_address(&from),
            "data": format!("0x{}", hex::encode(data)),
            "value": format!("{:#x}", value),
        });
        if let Some(to) = to {
            tx["to"] = json!(hex_address(&to));
        }
        if let Some(gas) = self.config.gas_limit {
            tx["gas"] = json!(format!("{:#x}", gas));
        }

        let lock = self.account_lock(from);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let hash = self.request("eth_sendTransaction", json!([tx]), RetryMode::Submission)?;
        let hash = hash
            .as_str()
            .ok_or_else(|| RpcError::Malformed("transaction hash is not a string".to_string()))?
            .to_string();
        let receipt = self.wait_receipt(&hash)?;
        Ok((hash, receipt))
    }

    fn wait_receipt(&self, hash: &TxHash) -> Result<Value, RpcError> {
        let deadline = Instant::now() + Duration::from_millis(self.config.receipt_timeout_ms);
        loop {
            let receipt = self.request("eth_getTransactionReceipt", json!([hash]), RetryMode::Idempotent)?;
            if !receipt.is_null() {
                return Ok(receipt);
            }
            if Instant::now() >= deadline {
                return Err(RpcError::Timeout(format!("no receipt for {}", hash)));
            }
            sleep(Duration::from_millis(self.config.receipt_poll_interval_ms));
        }
    }
}

fn receipt_succeeded(receipt: &Value) -> bool {
    // pre-byzantium receipts carry no status; treat them as successful
    receipt["status"]
        .as_str()
        .and_then(parse_u256)
        .map(|s| !s.is_zero())
        .unwrap_or(true)
}

impl ChainClient for RpcClient {
    fn accounts(&self) -> Result<Vec<EVMAddress>, RpcError> {
        let result = self.request("eth_accounts", json!([]), RetryMode::Idempotent)?;
        result
            .as_array()
            .ok_or_else(|| RpcError::Malformed("eth_accounts did not return a list".to_string()))?
            .iter()
            .map(|a| {
                a.as_str()
                    .and_then(parse_address)
                    .ok_or_else(|| RpcError::Malformed(format!("bad account {}", a)))
            })
            .collect()
    }

    fn deploy(
        &self,
        bytecode: &[u8],
        constructor_args: &[TypedValue],
        value: EVMU256,
        from: EVMAddress,
    ) -> Result<InstanceHandle, DeployError> {
        let data = [bytecode, encode_args(constructor_args).as_slice()].concat();
        let (hash, receipt) = match self.transact(from, None, &data, value) {
            Ok(r) => r,
            Err(e) if e.is_revert() => return Err(DeployError::Reverted { tx: None }),
            Err(e) => return Err(e.into()),
        };
        if !receipt_succeeded(&receipt) {
            return Err(DeployError::Reverted { tx: Some(hash) });
        }
        let address = receipt["contractAddress"]
            .as_str()
            .and_then(parse_address)
            .ok_or_else(|| DeployError::NoContractAddress(hash.clone()))?;
        debug!("deployed at {:?} by {}", address, hash);
        Ok(InstanceHandle {
            address,
            deploy_tx: Some(hash),
        })
    }

    fn call(
        &self,
        instance: &InstanceHandle,
        member: &CallableMember,
        args: &[TypedValue],
        value: EVMU256,
        from: EVMAddress,
    ) -> Result<CallReceipt, CallError> {
        let data = encode_call(member.selector(), args);
        match self.transact(from, Some(instance.address), &data, value) {
            Ok((hash, receipt)) => Ok(CallReceipt {
                success: receipt_succeeded(&receipt),
                tx: Some(hash),
            }),
            Err(e) if e.is_revert() => Ok(CallReceipt {
                tx: None,
                success: false,
            }),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch_trace(&self, tx: &TxHash) -> Result<ExecutionTrace, TraceUnavailableError> {
        let options = json!({
            "disableStorage": true,
            "disableMemory": true,
            "enableMemory": false,
            "enableReturnData": false,
        });
        match self.request("debug_traceTransaction", json!([tx, options]), RetryMode::Idempotent) {
            Ok(result) => parse_struct_logs(&result),
            Err(RpcError::Node { code, message }) if code == METHOD_NOT_FOUND => {
                Err(TraceUnavailableError::Unsupported(message))
            }
            Err(e) => Err(e.into()),
        }
    }
}
