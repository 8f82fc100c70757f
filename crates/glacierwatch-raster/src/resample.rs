//! Grid-to-grid resampling.

use ndarray::Array2;

use glacierwatch_core::error::Result;
use glacierwatch_geo::transform::Reprojector;

use crate::grid::Raster;

/// Resample `source` onto `template`'s grid and CRS by nearest neighbor.
///
/// For every template pixel center the matching source pixel is looked up
/// (through a CRS transform when the two differ); template pixels falling
/// outside the source become nodata. This is how the project DEM gets
/// aligned to a scene's band grid before per-glacier statistics.
pub fn reproject_match(source: &Raster, template: &Raster) -> Result<Raster> {
    let to_source = Reprojector::new(template.epsg, source.epsg)?;
    let fill = source.nodata.unwrap_or(f32::NAN);
    let mut data = Array2::from_elem((template.height(), template.width()), fill);

    for ((row, col), out) in data.indexed_iter_mut() {
        let (x, y) = template
            .transform
            .pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
        let (sx, sy) = to_source.convert(x, y)?;
        let (fcol, frow) = source.transform.geo_to_pixel(sx, sy);
        let (scol, srow) = (fcol.floor(), frow.floor());
        if scol < 0.0 || srow < 0.0 {
            continue;
        }
        let (scol, srow) = (scol as usize, srow as usize);
        if scol >= source.width() || srow >= source.height() {
            continue;
        }
        *out = source.data[[srow, scol]];
    }

    Ok(Raster {
        data,
        transform: template.transform,
        epsg: template.epsg,
        nodata: source.nodata,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoTransform;

    #[test]
    fn downsamples_by_nearest_neighbor() {
        // 4x4 source at 10 m, template 2x2 at 20 m over the same extent.
        let source = Raster {
            data: Array2::from_shape_fn((4, 4), |(r, c)| (r * 4 + c) as f32),
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: 40.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            epsg: 32633,
            nodata: Some(-9999.0),
        };
        let template = Raster {
            data: Array2::zeros((2, 2)),
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: 40.0,
                pixel_width: 20.0,
                pixel_height: -20.0,
            },
            epsg: 32633,
            nodata: None,
        };

        let out = reproject_match(&source, &template).unwrap();
        // Template centers land in source pixels (1,1), (1,3), (3,1), (3,3).
        assert_eq!(out.data[[0, 0]], 5.0);
        assert_eq!(out.data[[0, 1]], 7.0);
        assert_eq!(out.data[[1, 0]], 13.0);
        assert_eq!(out.data[[1, 1]], 15.0);
    }

    #[test]
    fn out_of_source_pixels_become_nodata() {
        let source = Raster {
            data: Array2::from_elem((2, 2), 1.0),
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: 20.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            epsg: 32633,
            nodata: Some(-9999.0),
        };
        let template = Raster {
            data: Array2::zeros((2, 2)),
            transform: GeoTransform {
                origin_x: 1000.0,
                origin_y: 2000.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            epsg: 32633,
            nodata: None,
        };

        let out = reproject_match(&source, &template).unwrap();
        assert!(out.data.iter().all(|&v| v == -9999.0));
    }
}
