//! Windowed clipping of (remote) rasters to an AOI.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};

use geo::{BoundingRect, MultiPolygon};
use tracing::{debug, info};

use glacierwatch_core::error::Result;
use glacierwatch_geo::transform::reproject_multipolygon;

use crate::geotiff::{write_geotiff, GeoTiffReader};
use crate::grid::{Bounds, PixelWindow, Raster};
use crate::mask::rasterize_mask;

/// Fallback sentinel for rasters that define no nodata of their own.
const DEFAULT_NODATA: f32 = -9999.0;

/// Clip behavior knobs.
#[derive(Debug, Clone, Copy)]
pub struct ClipParams {
    /// Extra pixels read around the AOI window on each side.
    pub pad_pixels: usize,
    /// Count boundary-touching pixels as inside the AOI.
    pub all_touched: bool,
}

impl Default for ClipParams {
    fn default() -> Self {
        Self {
            pad_pixels: 2,
            all_touched: true,
        }
    }
}

/// Clip a raster to an AOI and write the result as a compressed GeoTIFF.
///
/// The source is read through whatever `Read + Seek` it offers (a local
/// file or an [`crate::remote::HttpRangeReader`]), and only the pixel
/// window intersecting the AOI is decoded. Pixels outside the AOI, and
/// pixels already invalid in the source, are set to the nodata sentinel.
///
/// Returns `Ok(None)` when the AOI misses the raster entirely or the
/// clipped window holds no valid data; no output file is written then.
pub fn clip_to_aoi<R: Read + Seek>(
    source: R,
    source_label: &str,
    aoi: &MultiPolygon<f64>,
    aoi_epsg: u32,
    out_path: &Path,
    params: ClipParams,
) -> Result<Option<PathBuf>> {
    let mut reader = GeoTiffReader::open(source, source_label)?;

    let aoi_native = reproject_multipolygon(aoi, aoi_epsg, reader.epsg())?;
    let Some(aoi_rect) = aoi_native.bounding_rect() else {
        return Ok(None);
    };
    let aoi_bounds = Bounds {
        minx: aoi_rect.min().x,
        miny: aoi_rect.min().y,
        maxx: aoi_rect.max().x,
        maxy: aoi_rect.max().y,
    };

    let raster_bounds = {
        let t = reader.transform();
        let (maxx, miny) = t.pixel_to_geo(reader.width() as f64, reader.height() as f64);
        Bounds {
            minx: t.origin_x,
            miny,
            maxx,
            maxy: t.origin_y,
        }
    };

    if !aoi_bounds.overlaps(&raster_bounds) {
        debug!(source = source_label, "AOI does not overlap raster bounds");
        return Ok(None);
    }

    let shared = aoi_bounds.intersection(&raster_bounds);
    let window = PixelWindow::from_bounds(
        &shared,
        &reader.transform(),
        reader.width(),
        reader.height(),
    )
    .padded(params.pad_pixels, reader.width(), reader.height());
    if window.is_empty() {
        return Ok(None);
    }

    let data = reader.read_window(&window)?;
    let window_transform = reader
        .transform()
        .window_transform(window.col_off, window.row_off);

    let nodata = reader.nodata().unwrap_or(DEFAULT_NODATA);
    let inside = rasterize_mask(
        &aoi_native,
        &window_transform,
        window.width,
        window.height,
        params.all_touched,
    );

    let mut out = data;
    for ((row, col), value) in out.indexed_iter_mut() {
        let invalid = !value.is_finite() || reader.nodata().map_or(false, |nd| *value == nd);
        if invalid || !inside[[row, col]] {
            *value = nodata;
        }
    }

    if out.iter().all(|&v| v == nodata) {
        debug!(source = source_label, "Clip result is entirely nodata");
        return Ok(None);
    }

    let clipped = Raster {
        data: out,
        transform: window_transform,
        epsg: reader.epsg(),
        nodata: Some(nodata),
    };
    write_geotiff(out_path, &clipped)?;
    info!(
        source = source_label,
        out = %out_path.display(),
        width = window.width,
        height = window.height,
        "Wrote clipped raster"
    );
    Ok(Some(out_path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geotiff::{open_file, write_geotiff};
    use crate::grid::GeoTransform;
    use geo::polygon;
    use ndarray::Array2;

    fn source_raster() -> Raster {
        Raster {
            data: Array2::from_elem((20, 20), 7.0),
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: 200.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            epsg: 32633,
            nodata: Some(-9999.0),
        }
    }

    fn write_source(dir: &Path) -> PathBuf {
        let path = dir.join("source.tif");
        write_geotiff(&path, &source_raster()).unwrap();
        path
    }

    fn mp(minx: f64, miny: f64, maxx: f64, maxy: f64) -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: minx, y: miny),
            (x: maxx, y: miny),
            (x: maxx, y: maxy),
            (x: minx, y: maxy),
        ]])
    }

    #[test]
    fn aoi_outside_bounds_yields_no_data() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let out = dir.path().join("clip.tif");

        let result = clip_to_aoi(
            std::io::BufReader::new(std::fs::File::open(&source).unwrap()),
            "source.tif",
            &mp(5_000.0, 5_000.0, 6_000.0, 6_000.0),
            32633,
            &out,
            ClipParams::default(),
        )
        .unwrap();
        assert!(result.is_none());
        assert!(!out.exists());
    }

    #[test]
    fn full_extent_aoi_preserves_every_valid_pixel() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let out = dir.path().join("clip.tif");

        let result = clip_to_aoi(
            std::io::BufReader::new(std::fs::File::open(&source).unwrap()),
            "source.tif",
            &mp(0.0, 0.0, 200.0, 200.0),
            32633,
            &out,
            ClipParams::default(),
        )
        .unwrap();
        assert!(result.is_some());

        let clipped = open_file(&out).unwrap().read_all().unwrap();
        assert_eq!(clipped.valid_count(), source_raster().valid_count());
    }

    #[test]
    fn outside_aoi_pixels_become_nodata() {
        let dir = tempfile::tempdir().unwrap();
        let source = write_source(dir.path());
        let out = dir.path().join("clip.tif");

        // West half only, with no padding so the east half stays out.
        let result = clip_to_aoi(
            std::io::BufReader::new(std::fs::File::open(&source).unwrap()),
            "source.tif",
            &mp(0.0, 0.0, 100.0, 200.0),
            32633,
            &out,
            ClipParams {
                pad_pixels: 0,
                all_touched: false,
            },
        )
        .unwrap()
        .unwrap();

        let clipped = open_file(&result).unwrap().read_all().unwrap();
        assert_eq!(clipped.width(), 10);
        assert_eq!(clipped.height(), 20);
        assert_eq!(clipped.valid_count(), 200);
    }
}
