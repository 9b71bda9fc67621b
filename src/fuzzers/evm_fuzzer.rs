/// The deploy / exercise / collect loop
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use bytes::Bytes;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    evm::{
        abi::{format_args, TypedValue},
        compiler::CompiledContract,
        config::FuzzConfig,
        contract_utils::{CallableMember, Interface},
        generator::ArgGenerator,
        onchain::{ChainClient, InstanceHandle, RpcError},
        oracle::{run_detectors, DetectionCtx, Detector, Finding, Severity},
        trace::interpret,
        types::{EVMAddress, EVMU256, TxHash},
    },
    rand_utils::round_rng,
    report::RunReport,
};

#[derive(thiserror::Error, Debug)]
pub enum FuzzError {
    #[error("cannot list node accounts: {0}")]
    Accounts(#[from] RpcError),
    #[error("node has no unlocked accounts")]
    NoAccounts,
    #[error("cannot start worker pool: {0}")]
    Pool(#[from] rayon::ThreadPoolBuildError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Deploying,
    Exercising,
    Collecting,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RoundStatus {
    Completed,
    Failed { phase: RoundPhase, reason: String },
    Cancelled,
}

/// What happened to one member invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum TxOutcome {
    /// Trace retrieved and run through every detector
    Analyzed { tx: TxHash, steps: usize, findings: usize },
    Reverted { tx: Option<TxHash> },
    /// Call succeeded but its trace could not be obtained
    Inconclusive { tx: TxHash, reason: String },
    /// The call itself failed
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallRecord {
    pub member: String,
    pub args: Vec<TypedValue>,
    pub value: EVMU256,
    #[serde(flatten)]
    pub outcome: TxOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Round {
    pub index: usize,
    pub account: EVMAddress,
    pub instance: Option<EVMAddress>,
    pub deploy_tx: Option<TxHash>,
    pub calls: Vec<CallRecord>,
    pub findings: Vec<Finding>,
    #[serde(flatten)]
    pub status: RoundStatus,
}

impl Round {
    fn new(index: usize, account: EVMAddress) -> Self {
        Self {
            index,
            account,
            instance: None,
            deploy_tx: None,
            calls: vec![],
            findings: vec![],
            status: RoundStatus::Completed,
        }
    }

    fn fail(mut self, phase: RoundPhase, reason: String) -> Self {
        warn!("round {} failed while {:?}: {}", self.index, phase, reason);
        self.status = RoundStatus::Failed { phase, reason };
        self
    }
}

pub struct EVMFuzzer {
    client: Arc<dyn ChainClient>,
    name: String,
    interface: Interface,
    bytecode: Bytes,
    detectors: Vec<Box<dyn Detector>>,
    config: FuzzConfig,
    cancel: Arc<AtomicBool>,
}

impl EVMFuzzer {
    pub fn new(
        client: Arc<dyn ChainClient>,
        contract: CompiledContract,
        detectors: Vec<Box<dyn Detector>>,
        config: FuzzConfig,
        cancel: Arc<AtomicBool>,
    ) -> Self {
        Self {
            client,
            name: contract.name,
            interface: contract.interface,
            bytecode: contract.bytecode,
            detectors,
            config,
            cancel,
        }
    }

    /// Run every configured round. Only start-up failures are errors; anything that
    /// goes wrong inside a round is recorded on that round.
    pub fn run(&self) -> Result<RunReport, FuzzError> {
        let accounts = self.client.accounts()?;
        if accounts.is_empty() {
            return Err(FuzzError::NoAccounts);
        }
        // accounts, then the zero address; each round moves its signer to the front
        let mut pool = accounts.clone();
        pool.push(EVMAddress::zero());
        let generator = ArgGenerator::new(self.config.generator.clone(), pool);

        info!(
            "Fuzzing {} for {} rounds with {} worker(s), seed {}",
            self.name, self.config.rounds, self.config.workers, self.config.seed
        );
        let workers = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.max(1))
            .build()?;
        let rounds: Vec<Round> = workers.install(|| {
            (0..self.config.rounds)
                .into_par_iter()
                .map(|index| self.run_round(index, &accounts, &generator))
                .collect()
        });
        Ok(RunReport::new(self.name.clone(), self.config.seed, rounds))
    }

    fn run_round(&self, index: usize, accounts: &[EVMAddress], generator: &ArgGenerator) -> Round {
        let account = accounts[index % accounts.len()];
        let mut round = Round::new(index, account);
        if self.cancel.load(Ordering::SeqCst) {
            debug!("round {} cancelled before start", index);
            round.status = RoundStatus::Cancelled;
            return round;
        }
        let mut rng = round_rng(self.config.seed, index);
        info!("round {}: deploying from {:?}", index, account);

        let (ctor_args, ctor_value) = match self.interface.constructor() {
            Some(ctor) => (generator.generate_args(ctor, &mut rng), generator.generate_value(ctor, &mut rng)),
            None => (vec![], EVMU256::zero()),
        };
        let instance = match self.client.deploy(&self.bytecode, &ctor_args, ctor_value, account) {
            Ok(instance) => instance,
            Err(e) => return round.fail(RoundPhase::Deploying, e.to_string()),
        };
        round.instance = Some(instance.address);
        round.deploy_tx = instance.deploy_tx.clone();
        let generator = generator.for_round(account, instance.address);
        debug!(
            "round {}: instance {:?}, {} pooled address(es)",
            index,
            instance.address,
            generator.address_pool().len()
        );

        for member in self.interface.functions() {
            let args = generator.generate_args(member, &mut rng);
            let value = generator.generate_value(member, &mut rng);
            debug!("round {}: {}{} value {}", index, member.name, format_args(&args), value);
            let (outcome, abort) = self.exercise(&mut round, &instance, member, &args, value);
            round.calls.push(CallRecord {
                member: member.name.clone(),
                args,
                value,
                outcome,
            });
            if let Some((phase, reason)) = abort {
                return round.fail(phase, reason);
            }
        }
        info!(
            "round {}: {} call(s), {} finding(s)",
            index,
            round.calls.len(),
            round.findings.len()
        );
        round
    }

    /// Call one member and, when it succeeds, analyse its trace before returning.
    /// The second element is set when a connectivity failure survived retries.
    fn exercise(
        &self,
        round: &mut Round,
        instance: &InstanceHandle,
        member: &CallableMember,
        args: &[TypedValue],
        value: EVMU256,
    ) -> (TxOutcome, Option<(RoundPhase, String)>) {
        let receipt = match self.client.call(instance, member, args, value, round.account) {
            Ok(receipt) => receipt,
            Err(e) if e.is_transient() => {
                let reason = e.to_string();
                return (TxOutcome::Failed { reason: reason.clone() }, Some((RoundPhase::Exercising, reason)));
            }
            Err(e) => {
                warn!("round {}: {} failed: {}", round.index, member.name, e);
                return (TxOutcome::Failed { reason: e.to_string() }, None);
            }
        };
        let tx = match (receipt.success, receipt.tx) {
            (false, tx) => return (TxOutcome::Reverted { tx }, None),
            (true, Some(tx)) => tx,
            (true, None) => {
                return (
                    TxOutcome::Failed {
                        reason: "node reported success without a transaction".to_string(),
                    },
                    None,
                )
            }
        };

        let trace = match self.client.fetch_trace(&tx) {
            Ok(trace) => trace,
            Err(e) => {
                let reason = e.to_string();
                let abort = e.is_transient().then(|| (RoundPhase::Collecting, reason.clone()));
                return (TxOutcome::Inconclusive { tx, reason }, abort);
            }
        };
        if trace.failed {
            return (TxOutcome::Reverted { tx: Some(tx) }, None);
        }

        let facts = interpret(&trace.steps);
        debug!(
            "round {}: {} trace has {} step(s), {} frame(s), nesting {}",
            round.index,
            member.name,
            facts.steps,
            facts.frames.len(),
            facts.max_nesting()
        );
        let ctx = DetectionCtx::new(round.index, &member.name);
        let findings = run_detectors(&self.detectors, &facts, &ctx);
        for finding in &findings {
            match finding.severity {
                Severity::Critical => warn!("{}", finding),
                Severity::Warning => info!("{}", finding),
            }
        }
        let outcome = TxOutcome::Analyzed {
            tx,
            steps: trace.steps.len(),
            findings: findings.len(),
        };
        round.findings.extend(findings);
        (outcome, None)
    }
}
