//! Longhaul CLI - Command-line interface
//!
//! Drives extended-duration delivery reliability runs against the loopback
//! transport and reports the verdict through the process exit code.

mod commands;

use clap::Parser;
use longhaul_core::tracing_setup::{CliLogLevel, init_tracing};

#[derive(Parser)]
#[command(name = "longhaul")]
#[command(about = "A long-haul delivery reliability harness")]
struct Cli {
    /// Console log level
    #[arg(long, default_value = "info")]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level.as_tracing_level(), None)
        .map_err(|e| anyhow::anyhow!("failed initializing tracing: {e}"))?;

    commands::handle_command(cli.command).await?;

    Ok(())
}
