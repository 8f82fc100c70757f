//! Glacier snow/snowline analysis for GlacierWatch.

pub mod ndsi;
pub mod snow;

pub use ndsi::{compute_ndsi, snow_mask};
pub use snow::{analyze_glaciers, buffered_cover, included_glaciers, GlacierGeometry};
