//! GlacierWatch CLI - pipeline workers and project tooling
//!
//! One binary hosts the discovery run, the DEM acquisition run, and the two
//! long-running workers (download, process) that pull scenes from the
//! shared work queue.

mod auth;
mod cli;
mod commands;
mod paths;
mod stac;

use anyhow::Result;
use clap::Parser;
use cli::Cli;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async { commands::execute(cli).await })?;

    Ok(())
}
