//! Main entry point for the sourcetracker application.
//!
//! Estimates, for each sink sample, the proportion of its sequences that
//! came from each known source environment or from an Unknown source,
//! using a collapsed Gibbs sampler over feature counts.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{run_cli, Cli};
use log::{error, info};

/// Main function: parses arguments and runs the requested command.
fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    info!("Starting sourcetracker with arguments: {:?}", cli);

    if let Err(e) = run_cli(cli) {
        error!("Run failed: {:#}", e);
        return Err(e);
    }

    info!("Analysis finished successfully.");
    Ok(())
}
