//! Geometry, projection, and DEM tile selection for GlacierWatch.

pub mod dem_select;
pub mod geometry;
pub mod transform;

pub use dem_select::{select_dem_tiles, DemCandidate};
pub use geometry::{multipolygon_from_geojson, pad_bounds};
pub use transform::{reproject_geometry, reproject_multipolygon, Reprojector};
