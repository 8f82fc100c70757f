//! Normalized Difference Snow Index.

use glacierwatch_core::error::{GlacierError, Result};
use glacierwatch_raster::grid::Raster;
use ndarray::Array2;

/// Compute `(green - swir) / (green + swir)` per pixel.
///
/// Pixels invalid in either band, and pixels where the quotient is not
/// finite (both bands zero), come out as NaN. They are masked out, never
/// treated as an index of zero.
pub fn compute_ndsi(green: &Raster, swir: &Raster) -> Result<Raster> {
    if green.data.dim() != swir.data.dim() {
        return Err(GlacierError::UnsupportedRaster {
            reason: format!(
                "Band grids differ: green {:?} vs swir {:?}",
                green.data.dim(),
                swir.data.dim()
            ),
        });
    }

    let mut data = Array2::from_elem(green.data.dim(), f32::NAN);
    for ((row, col), out) in data.indexed_iter_mut() {
        let g = green.data[[row, col]];
        let s = swir.data[[row, col]];
        if !green.is_valid(g) || !swir.is_valid(s) {
            continue;
        }
        let index = (g - s) / (g + s);
        if index.is_finite() {
            *out = index;
        }
    }

    Ok(Raster {
        data,
        transform: green.transform,
        epsg: green.epsg,
        nodata: None,
    })
}

/// Threshold an index raster into a snow mask.
///
/// The mask is tri-state: 1.0 for snow, 0.0 for no snow, NaN where the
/// index itself was invalid. Invalid never degrades to "no snow".
pub fn snow_mask(index: &Raster, threshold: f64) -> Raster {
    let threshold = threshold as f32;
    let data = index.data.mapv(|v| {
        if !v.is_finite() {
            f32::NAN
        } else if v >= threshold {
            1.0
        } else {
            0.0
        }
    });

    Raster {
        data,
        transform: index.transform,
        epsg: index.epsg,
        nodata: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glacierwatch_raster::grid::GeoTransform;

    fn band(values: Vec<f32>, nodata: Option<f32>) -> Raster {
        Raster {
            data: Array2::from_shape_vec((2, 2), values).unwrap(),
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: 40.0,
                pixel_width: 20.0,
                pixel_height: -20.0,
            },
            epsg: 32633,
            nodata,
        }
    }

    #[test]
    fn equal_nonzero_bands_give_zero_index() {
        let green = band(vec![0.5, 0.5, 0.5, 0.5], None);
        let swir = band(vec![0.5, 0.5, 0.5, 0.5], None);
        let ndsi = compute_ndsi(&green, &swir).unwrap();
        assert!(ndsi.data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn zero_over_zero_is_masked_not_zero() {
        let green = band(vec![0.0, 0.8, 0.5, 0.5], None);
        let swir = band(vec![0.0, 0.2, 0.5, 0.5], None);
        let ndsi = compute_ndsi(&green, &swir).unwrap();
        assert!(ndsi.data[[0, 0]].is_nan());
        assert!((ndsi.data[[0, 1]] - 0.6).abs() < 1e-6);
    }

    #[test]
    fn nodata_inputs_stay_invalid() {
        let green = band(vec![-9999.0, 0.6, 0.6, 0.6], Some(-9999.0));
        let swir = band(vec![0.2, 0.2, 0.2, 0.2], None);
        let ndsi = compute_ndsi(&green, &swir).unwrap();
        assert!(ndsi.data[[0, 0]].is_nan());
        assert!(ndsi.data[[0, 1]].is_finite());
    }

    #[test]
    fn mask_keeps_invalid_pixels_invalid() {
        let green = band(vec![0.0, 0.9, 0.3, 0.9], None);
        let swir = band(vec![0.0, 0.1, 0.3, 0.5], None);
        let ndsi = compute_ndsi(&green, &swir).unwrap();
        let mask = snow_mask(&ndsi, 0.4);
        assert!(mask.data[[0, 0]].is_nan(), "invalid index stays invalid");
        assert_eq!(mask.data[[0, 1]], 1.0, "0.8 is snow");
        assert_eq!(mask.data[[1, 0]], 0.0, "0.0 is not snow");
        // (0.9 - 0.5) / 1.4 ~ 0.29, below the cutoff
        assert_eq!(mask.data[[1, 1]], 0.0);
    }

    #[test]
    fn mismatched_grids_are_rejected() {
        let green = band(vec![0.5; 4], None);
        let swir = Raster {
            data: Array2::from_elem((3, 3), 0.5),
            ..band(vec![0.5; 4], None)
        };
        assert!(compute_ndsi(&green, &swir).is_err());
    }
}
