//! Project and glacier models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A monitored region: owns an AOI and the glaciers inside it.
///
/// Immutable after creation; AOI edits happen out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier.
    pub project_id: String,

    /// Human-readable name.
    pub name: String,

    /// Optional description.
    pub description: Option<String>,

    /// Area of interest as a GeoJSON MultiPolygon in EPSG:4326.
    pub area_of_interest: String,

    /// When the project was created.
    pub created_at: DateTime<Utc>,
}

/// A glacier of interest within a project AOI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Glacier {
    /// Unique identifier.
    pub glacier_id: String,

    /// Human-readable name.
    pub name: String,

    /// Outline as a GeoJSON MultiPolygon in EPSG:4326.
    pub geometry: String,

    /// Nominal area in square meters, pre-computed in a metric projection.
    pub area_m2: f64,
}
