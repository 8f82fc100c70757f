//! Per-scene analysis results.
//!
//! Result rows are written once per successful analysis and never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Aggregate snow analysis for one scene.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneAnalysis {
    /// Unique identifier.
    pub id: Uuid,

    /// Scene this analysis belongs to.
    pub scene_id: String,

    /// When the analysis ran.
    pub analysis_date: DateTime<Utc>,

    /// Sum of snow area over all analyzed glaciers, in square meters.
    pub total_snow_area_m2: f64,
}

impl SceneAnalysis {
    pub fn new(scene_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            scene_id: scene_id.into(),
            analysis_date: Utc::now(),
            total_snow_area_m2: 0.0,
        }
    }
}

/// Snow cover measurement for one (scene, glacier) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlacierSnowRecord {
    /// Unique identifier.
    pub id: Uuid,

    /// Parent analysis row.
    pub analysis_id: Uuid,

    /// Glacier being measured.
    pub glacier_id: String,

    /// Scene the measurement comes from.
    pub scene_id: String,

    /// Snow-covered area in square meters.
    pub snow_area_m2: f64,

    /// 20th-percentile elevation of snow pixels, in meters. NaN when the
    /// glacier has no snow-covered pixels.
    pub snowline_elevation_m: f64,

    /// When the row was created.
    pub created_at: DateTime<Utc>,
}

impl GlacierSnowRecord {
    pub fn new(
        analysis_id: Uuid,
        glacier_id: impl Into<String>,
        scene_id: impl Into<String>,
        snow_area_m2: f64,
        snowline_elevation_m: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            analysis_id,
            glacier_id: glacier_id.into(),
            scene_id: scene_id.into(),
            snow_area_m2,
            snowline_elevation_m,
            created_at: Utc::now(),
        }
    }
}
