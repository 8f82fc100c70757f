//! Command implementations

mod dem;
mod discover;
mod download;
mod process;

use anyhow::Result;

use crate::cli::{Cli, Commands};

/// Outcome of one worker iteration, driving the polling backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// A scene was handled end-to-end.
    Success,
    /// A scene was claimed but failed; it got a `fail` transition.
    Failure,
    /// Nothing to do right now.
    NoScene,
}

/// Execute a CLI command
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Discover(args) => discover::execute(args).await,
        Commands::Dem(args) => dem::execute(args).await,
        Commands::Download(args) => download::execute(args).await,
        Commands::Process(args) => process::execute(args).await,
    }
}
