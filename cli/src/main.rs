mod evm;

use clap::{ArgAction, Parser, Subcommand};
use evm::{evm_main, EvmArgs};
use tracefuzz::{logger, report::EXIT_FATAL};

/// CLI for tracefuzz
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// More output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Less output (repeatable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    quiet: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fuzz an EVM contract
    Evm(EvmArgs),
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = logger::init(logger::level_for(cli.verbose, cli.quiet)) {
        eprintln!("Failed to initialize logger: {}", e);
    }
    let code = match cli.command {
        Commands::Evm(args) => evm_main(args).unwrap_or_else(|e| {
            eprintln!("Error: {:#}", e);
            EXIT_FATAL
        }),
    };
    std::process::exit(code);
}
