//! GlacierWatch Core - Domain models, scene lifecycle, and configuration
//!
//! This crate contains the domain types shared by every other crate in the
//! workspace: the scene state machine, project/glacier models, analysis
//! results, the error type, and configuration loading.

pub mod config;
pub mod error;
pub mod models;

pub use error::{GlacierError, Result};
pub use models::{Scene, SceneStatus, SceneTransition, Stage};
