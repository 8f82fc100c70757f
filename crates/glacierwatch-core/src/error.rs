//! Error types for GlacierWatch

use thiserror::Error;

use crate::models::SceneStatus;

#[derive(Debug, Error)]
pub enum GlacierError {
    // Configuration errors
    #[error("Missing required configuration: {key}")]
    ConfigMissing { key: String },

    #[error("Invalid configuration value for {key}: {reason}")]
    ConfigInvalid { key: String, reason: String },

    // Project / scene errors
    #[error("Project not found: {project_id}")]
    ProjectNotFound { project_id: String },

    #[error("Scene not found: {scene_id}")]
    SceneNotFound { scene_id: String },

    #[error("Illegal scene transition: {from} -> {to}")]
    InvalidTransition { from: SceneStatus, to: SceneStatus },

    #[error("Asset not found for band {band}")]
    MissingAsset { band: String },

    // Geometry / CRS errors
    #[error("CRS mismatch: expected EPSG:{expected}, found EPSG:{found}")]
    CrsMismatch { expected: u32, found: u32 },

    #[error("Projection failed: {reason}")]
    Projection { reason: String },

    #[error("Invalid geometry: {reason}")]
    InvalidGeometry { reason: String },

    #[error("AOI polygon has zero area after reprojection")]
    EmptyAoi,

    // DEM selection errors
    #[error("No DEM candidates intersect the AOI")]
    NoDemCandidates,

    // Raster errors
    #[error("Raster has no CRS: {path}")]
    MissingCrs { path: String },

    #[error("Unsupported raster layout: {reason}")]
    UnsupportedRaster { reason: String },

    #[error("Cannot mosaic an empty list of rasters")]
    EmptyMosaic,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Transport / persistence errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, GlacierError>;
