use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// GlacierWatch - satellite snow-cover monitoring for glaciers
#[derive(Parser, Debug)]
#[command(name = "glacierwatch")]
#[command(about = "Satellite snow-cover monitoring for glaciers", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Search the imagery catalog and queue new scenes for download
    Discover(DiscoverArgs),

    /// Build the project DEM from catalog elevation tiles
    Dem(DemArgs),

    /// Run the download worker
    Download(DownloadArgs),

    /// Run the processing worker
    Process(ProcessArgs),
}

#[derive(Parser, Debug)]
pub struct DiscoverArgs {
    /// Project to discover scenes for
    #[arg(long)]
    pub project_id: String,

    /// Start of the acquisition date range (YYYY-MM-DD), default 30 days ago
    #[arg(long)]
    pub date_from: Option<NaiveDate>,

    /// End of the acquisition date range (YYYY-MM-DD), default today
    #[arg(long)]
    pub date_to: Option<NaiveDate>,
}

#[derive(Parser, Debug)]
pub struct DemArgs {
    /// Project to build the DEM for
    #[arg(long)]
    pub project_id: String,
}

#[derive(Parser, Debug)]
pub struct DownloadArgs {
    /// Handle at most one scene, then exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Parser, Debug)]
pub struct ProcessArgs {
    /// Handle at most one scene, then exit
    #[arg(long)]
    pub once: bool,

    /// Analyze without claiming the scene or persisting results; writes a
    /// human-readable summary instead
    #[arg(long)]
    pub dry_run: bool,

    /// Process this specific scene (dry-run only)
    #[arg(long)]
    pub scene_id: Option<String>,
}
