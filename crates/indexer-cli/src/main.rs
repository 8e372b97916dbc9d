//! Corpus Indexer
//!
//! Drives bulk indexing jobs against the indexing service.
//!
//! # Usage
//!
//! ```bash
//! corpus-indexer run [--batch-size N] [--only-tagged TAG] [--total N]
//! corpus-indexer watch [--interval-ms N]
//! corpus-indexer stop
//! corpus-indexer status
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/corpus-indexer/config.toml)
//! 3. Environment variables (INDEXER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use indexer_cli::{run_job, show_status, stop_job, watch_job, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let overrides = cli.overrides();

    match cli.command {
        Commands::Run {
            batch_size,
            only_tagged,
            total,
        } => {
            run_job(&overrides, batch_size, only_tagged, total).await?;
        }
        Commands::Watch { interval_ms } => {
            watch_job(&overrides, interval_ms).await?;
        }
        Commands::Stop => {
            stop_job(&overrides).await?;
        }
        Commands::Status => {
            show_status(&overrides).await?;
        }
    }

    Ok(())
}
