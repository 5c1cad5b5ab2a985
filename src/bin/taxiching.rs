use std::{fs::File, path::PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use taxiching_ledger::{BankConfig, bin_utils::Service};
use tracing_subscriber::EnvFilter;

/// Runs a batch of wallet instructions and prints the resulting wallets as CSV
#[derive(Parser)]
#[command(name = "taxiching", version, about, long_about = None)]
struct Cli {
    /// CSV file with columns type,msisdn,name,pin,target,amount,reference
    instructions: PathBuf,
    /// JSON configuration file
    #[arg(long, env = "TAXICHING_CONFIG")]
    config: Option<PathBuf>,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BankConfig::load(cli.config.as_deref()).context("Failed to load config")?;
    let file = File::open(&cli.instructions)
        .with_context(|| format!("Failed to open `{}`", cli.instructions.display()))?;

    let service = Service {
        config,
        input: file,
        output: &mut std::io::stdout(),
        error_printer: Box::new(|line, err| eprintln!("Error at line {line}: {err}")),
    };
    service.run()
}
