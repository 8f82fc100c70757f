//! Mosaicking clipped rasters into one grid.

use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::info;

use glacierwatch_core::error::{GlacierError, Result};

use crate::geotiff::{open_file, write_geotiff};
use crate::grid::{GeoTransform, Raster};

/// Merge rasters into one covering the union of their extents.
///
/// Inputs must share a CRS. The output grid takes the first input's
/// resolution and nodata; each output pixel is sampled nearest-neighbor
/// from the inputs in order, first valid value wins. Fails on an empty
/// input list.
pub fn mosaic(rasters: &[Raster]) -> Result<Raster> {
    let first = rasters.first().ok_or(GlacierError::EmptyMosaic)?;
    for other in &rasters[1..] {
        if other.epsg != first.epsg {
            return Err(GlacierError::CrsMismatch {
                expected: first.epsg,
                found: other.epsg,
            });
        }
    }

    let bounds = rasters
        .iter()
        .map(Raster::bounds)
        .reduce(|a, b| a.union(&b))
        .expect("rasters is non-empty");

    let pixel_width = first.transform.pixel_width;
    let pixel_height = first.transform.pixel_height;
    let width = ((bounds.maxx - bounds.minx) / pixel_width).round() as usize;
    let height = ((bounds.maxy - bounds.miny) / -pixel_height).round() as usize;

    let transform = GeoTransform {
        origin_x: bounds.minx,
        origin_y: bounds.maxy,
        pixel_width,
        pixel_height,
    };

    let fill = first.nodata.unwrap_or(f32::NAN);
    let mut data = Array2::from_elem((height, width), fill);

    for ((row, col), out) in data.indexed_iter_mut() {
        let (x, y) = transform.pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
        for raster in rasters {
            let (fcol, frow) = raster.transform.geo_to_pixel(x, y);
            let (scol, srow) = (fcol.floor(), frow.floor());
            if scol < 0.0 || srow < 0.0 {
                continue;
            }
            let (scol, srow) = (scol as usize, srow as usize);
            if scol >= raster.width() || srow >= raster.height() {
                continue;
            }
            let value = raster.data[[srow, scol]];
            if raster.is_valid(value) {
                *out = value;
                break;
            }
        }
    }

    Ok(Raster {
        data,
        transform,
        epsg: first.epsg,
        nodata: first.nodata,
    })
}

/// Mosaic GeoTIFF files into one output file.
pub fn mosaic_files(inputs: &[PathBuf], out_path: &Path) -> Result<PathBuf> {
    if inputs.is_empty() {
        return Err(GlacierError::EmptyMosaic);
    }
    let mut rasters = Vec::with_capacity(inputs.len());
    for path in inputs {
        rasters.push(open_file(path)?.read_all()?);
    }
    let merged = mosaic(&rasters)?;
    write_geotiff(out_path, &merged)?;
    info!(
        inputs = inputs.len(),
        out = %out_path.display(),
        "Wrote mosaic"
    );
    Ok(out_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster(origin_x: f64, value: f32) -> Raster {
        Raster {
            data: Array2::from_elem((4, 4), value),
            transform: GeoTransform {
                origin_x,
                origin_y: 40.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            epsg: 32633,
            nodata: Some(-9999.0),
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        assert!(matches!(mosaic(&[]), Err(GlacierError::EmptyMosaic)));
    }

    #[test]
    fn single_raster_round_trips() {
        let input = raster(0.0, 5.0);
        let merged = mosaic(std::slice::from_ref(&input)).unwrap();
        assert_eq!(merged.data, input.data);
        assert_eq!(merged.transform, input.transform);
        assert_eq!(merged.epsg, input.epsg);
    }

    #[test]
    fn adjacent_rasters_cover_the_union() {
        let west = raster(0.0, 1.0);
        let east = raster(40.0, 2.0);
        let merged = mosaic(&[west, east]).unwrap();
        assert_eq!(merged.width(), 8);
        assert_eq!(merged.height(), 4);
        assert_eq!(merged.data[[0, 0]], 1.0);
        assert_eq!(merged.data[[0, 7]], 2.0);
    }

    #[test]
    fn first_valid_value_wins_in_overlap() {
        let mut west = raster(0.0, 1.0);
        west.data[[0, 3]] = -9999.0;
        let overlapping = raster(20.0, 2.0);
        let merged = mosaic(&[west, overlapping]).unwrap();
        // Column 3 overlaps both inputs; the first is nodata there on row 0.
        assert_eq!(merged.data[[0, 3]], 2.0);
        assert_eq!(merged.data[[1, 3]], 1.0);
    }

    #[test]
    fn crs_mismatch_is_rejected() {
        let mut other = raster(0.0, 1.0);
        other.epsg = 4326;
        let result = mosaic(&[raster(0.0, 1.0), other]);
        assert!(matches!(result, Err(GlacierError::CrsMismatch { .. })));
    }
}
