//! Raster I/O for GlacierWatch: GeoTIFF reading/writing, remote range
//! access, windowed clipping, polygon masking, and mosaicking.

pub mod clip;
pub mod geotiff;
pub mod grid;
pub mod mask;
pub mod mosaic;
pub mod remote;
pub mod resample;

pub use clip::{clip_to_aoi, ClipParams};
pub use geotiff::{open_file, write_geotiff, write_geotiff_multiband, GeoTiffReader};
pub use grid::{Bounds, GeoTransform, PixelWindow, Raster};
pub use mask::rasterize_mask;
pub use mosaic::{mosaic, mosaic_files};
pub use remote::{probe_cog, CogProbe, HttpRangeReader};
pub use resample::reproject_match;
