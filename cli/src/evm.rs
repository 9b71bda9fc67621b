use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::{Context, Result};
use clap::Parser;
use tracefuzz::{
    evm::{
        compiler::compiler_for,
        config::FuzzConfig,
        onchain::endpoints::RpcClient,
        oracles::default_detectors,
        types::EVMU256,
    },
    fuzzers::evm_fuzzer::EVMFuzzer,
};
use tracing::{info, warn};

/// Fuzz a Solidity contract on a development node and look for reentrancy and
/// tx.origin authorization in its execution traces
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct EvmArgs {
    /// Solidity source (.sol), an artifact stem (<Name> with <Name>.abi and <Name>.bin),
    /// either artifact file, or a directory of artifacts
    #[arg(short, long)]
    pub target: PathBuf,

    /// Contract to fuzz when the target holds several (Default: named like the file)
    #[arg(short, long)]
    pub contract: Option<String>,

    /// solc binary used for .sol targets
    #[arg(long, default_value = "solc")]
    pub solc: String,

    /// JSON-RPC endpoint of a node with unlocked accounts and the debug namespace
    #[arg(short = 'u', long, default_value = "http://127.0.0.1:8545")]
    pub rpc_url: String,

    /// JSON config file; flags given on the command line take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Number of rounds (Default: 10)
    #[arg(short, long)]
    pub rounds: Option<usize>,

    /// Random seed (Default: 0)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Rounds run concurrently (Default: 1)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Upper bound in wei of the value sent to payable members (Default: 1 ether)
    #[arg(long)]
    pub max_value: Option<u128>,

    /// Gas limit of every transaction (Default: 8000000)
    #[arg(long)]
    pub gas_limit: Option<u64>,

    /// Per-request timeout in milliseconds (Default: 20000)
    #[arg(long)]
    pub rpc_timeout: Option<u64>,

    /// Retries after a connectivity failure (Default: 3)
    #[arg(long)]
    pub rpc_retries: Option<usize>,

    /// Write the full report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,
}

impl EvmArgs {
    /// Config file (or defaults) with command line overrides applied
    fn fuzz_config(&self) -> Result<FuzzConfig> {
        let mut config = match &self.config {
            Some(path) => FuzzConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?,
            None => FuzzConfig::default(),
        };
        if let Some(rounds) = self.rounds {
            config.rounds = rounds;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(max_value) = self.max_value {
            config.generator.max_value = EVMU256::from(max_value);
        }
        if let Some(gas_limit) = self.gas_limit {
            config.rpc.gas_limit = Some(gas_limit);
        }
        if let Some(timeout) = self.rpc_timeout {
            config.rpc.timeout_ms = timeout;
        }
        if let Some(retries) = self.rpc_retries {
            config.rpc.retries = retries;
        }
        config.validate()?;
        Ok(config)
    }
}

/// Returns the process exit code; errors are fatal start-up failures
pub fn evm_main(args: EvmArgs) -> Result<i32> {
    let config = args.fuzz_config()?;

    let compiler = compiler_for(&args.target, args.solc.clone(), args.contract.clone());
    let contract = compiler
        .compile(&args.target)
        .with_context(|| format!("compiling {}", args.target.display()))?;
    info!(
        "Loaded {}: {} function(s), {} bytes of bytecode",
        contract.name,
        contract.interface.functions().count(),
        contract.bytecode.len()
    );

    let client = RpcClient::connect(args.rpc_url.clone(), config.rpc.clone())
        .with_context(|| format!("connecting to {}", args.rpc_url))?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted, finishing rounds in flight");
        flag.store(true, Ordering::SeqCst);
    })
    .context("installing Ctrl-C handler")?;

    let fuzzer = EVMFuzzer::new(Arc::new(client), contract, default_detectors(), config, cancel);
    let report = fuzzer.run()?;

    print!("{}", report.render_text());
    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("writing report to {}", path.display()))?;
        info!("Report written to {}", path.display());
    }
    Ok(report.exit_code())
}
