//! Scene lifecycle model and state machine.
//!
//! A scene is one remote imagery acquisition tracked end-to-end through the
//! pipeline: discovered by the catalog search, downloaded by a download
//! worker, and analyzed by a processing worker. All status mutation goes
//! through the work queue; the transition graph here is the single source
//! of truth for which moves are legal.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{GlacierError, Result};

/// Lifecycle status of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Discovered,
    QueuedForDownload,
    Downloading,
    Downloaded,
    FailedDownload,
    QueuedForProcessing,
    Processing,
    Processed,
    FailedProcessing,
}

impl SceneStatus {
    /// Database/text representation, matching the serde snake_case form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SceneStatus::Discovered => "discovered",
            SceneStatus::QueuedForDownload => "queued_for_download",
            SceneStatus::Downloading => "downloading",
            SceneStatus::Downloaded => "downloaded",
            SceneStatus::FailedDownload => "failed_download",
            SceneStatus::QueuedForProcessing => "queued_for_processing",
            SceneStatus::Processing => "processing",
            SceneStatus::Processed => "processed",
            SceneStatus::FailedProcessing => "failed_processing",
        }
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// `Downloaded` and `QueuedForProcessing` are interchangeable "ready for
    /// processing" states: a download worker may commit either, and the
    /// processing worker claims from both.
    pub fn can_transition(&self, to: SceneStatus) -> bool {
        use SceneStatus::*;
        matches!(
            (self, to),
            (Discovered, QueuedForDownload)
                | (QueuedForDownload, Downloading)
                | (Downloading, Downloaded)
                | (Downloading, QueuedForProcessing)
                | (Downloading, FailedDownload)
                | (FailedDownload, Downloading)
                | (Downloaded, Processing)
                | (QueuedForProcessing, Processing)
                | (Processing, Processed)
                | (Processing, FailedProcessing)
                | (FailedProcessing, Processing)
        )
    }

    /// True for statuses a worker currently holds exclusively.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, SceneStatus::Downloading | SceneStatus::Processing)
    }
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SceneStatus {
    type Err = GlacierError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "discovered" => Ok(SceneStatus::Discovered),
            "queued_for_download" => Ok(SceneStatus::QueuedForDownload),
            "downloading" => Ok(SceneStatus::Downloading),
            "downloaded" => Ok(SceneStatus::Downloaded),
            "failed_download" => Ok(SceneStatus::FailedDownload),
            "queued_for_processing" => Ok(SceneStatus::QueuedForProcessing),
            "processing" => Ok(SceneStatus::Processing),
            "processed" => Ok(SceneStatus::Processed),
            "failed_processing" => Ok(SceneStatus::FailedProcessing),
            other => Err(GlacierError::Serialization(format!(
                "Unknown scene status: {other}"
            ))),
        }
    }
}

/// Pipeline stage, used to pick the right attempts counter and statuses
/// for failure and reattempt handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Download,
    Processing,
}

impl Stage {
    /// Status a worker moves a scene into while holding it.
    pub fn in_progress_status(&self) -> SceneStatus {
        match self {
            Stage::Download => SceneStatus::Downloading,
            Stage::Processing => SceneStatus::Processing,
        }
    }

    /// Recoverable failure status for this stage.
    pub fn failed_status(&self) -> SceneStatus {
        match self {
            Stage::Download => SceneStatus::FailedDownload,
            Stage::Processing => SceneStatus::FailedProcessing,
        }
    }

    /// Default bound on reattempts for this stage.
    pub fn default_max_attempts(&self) -> i32 {
        match self {
            Stage::Download => 5,
            Stage::Processing => 3,
        }
    }
}

/// A status transition carrying exactly the payload its target requires.
///
/// Committing `Processed` without a result path, or a failure without an
/// error message, is unrepresentable.
#[derive(Debug, Clone, PartialEq)]
pub enum SceneTransition {
    /// Download finished; the scene is ready for the processing worker.
    ReadyForProcessing { download_path: PathBuf },
    /// Analysis finished and results were persisted.
    Processed { result_path: PathBuf },
    /// Download failed; eligible for bounded reattempt.
    FailedDownload { error: String },
    /// Processing failed; eligible for bounded reattempt.
    FailedProcessing { error: String },
}

impl SceneTransition {
    /// The status this transition lands in.
    pub fn target_status(&self) -> SceneStatus {
        match self {
            SceneTransition::ReadyForProcessing { .. } => SceneStatus::QueuedForProcessing,
            SceneTransition::Processed { .. } => SceneStatus::Processed,
            SceneTransition::FailedDownload { .. } => SceneStatus::FailedDownload,
            SceneTransition::FailedProcessing { .. } => SceneStatus::FailedProcessing,
        }
    }

    /// The stage whose attempts counter a failure increments, if any.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            SceneTransition::FailedDownload { .. } => Some(Stage::Download),
            SceneTransition::FailedProcessing { .. } => Some(Stage::Processing),
            _ => None,
        }
    }
}

/// One remote imagery acquisition tracked end-to-end.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    /// Catalog identifier of the acquisition.
    pub scene_id: String,

    /// Owning project.
    pub project_id: String,

    /// Band name -> resolvable asset URL, as discovered in the catalog.
    pub assets: HashMap<String, String>,

    /// When the imagery was acquired.
    pub acquisition_date: DateTime<Utc>,

    /// Lifecycle status.
    pub status: SceneStatus,

    /// Local folder holding the downloaded bands; set on successful download.
    pub download_path: Option<String>,

    /// Local folder holding analysis outputs; set only in `processed`.
    pub result_path: Option<String>,

    /// Download attempts so far.
    pub attempts_download: i32,

    /// Processing attempts so far.
    pub attempts_processing: i32,

    /// Last recorded failure message.
    pub last_error: Option<String>,

    /// When the scene row was created.
    pub created_at: DateTime<Utc>,

    /// Advances on every state mutation.
    pub updated_at: DateTime<Utc>,
}

impl Scene {
    /// Create a freshly discovered scene ready to be queued for download.
    pub fn discovered(
        scene_id: impl Into<String>,
        project_id: impl Into<String>,
        assets: HashMap<String, String>,
        acquisition_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            scene_id: scene_id.into(),
            project_id: project_id.into(),
            assets,
            acquisition_date,
            status: SceneStatus::QueuedForDownload,
            download_path: None,
            result_path: None,
            attempts_download: 0,
            attempts_processing: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempts counter for the given stage.
    pub fn attempts(&self, stage: Stage) -> i32 {
        match stage {
            Stage::Download => self.attempts_download,
            Stage::Processing => self.attempts_processing,
        }
    }
}
