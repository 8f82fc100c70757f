//! Per-glacier snow area and snowline statistics.

use geo::{BoundingRect, Contains, MultiPolygon, Rect};
use tracing::warn;

use glacierwatch_core::error::{GlacierError, Result};
use glacierwatch_core::models::{Glacier, GlacierSnowRecord, SceneAnalysis};
use glacierwatch_geo::geometry::multipolygon_from_geojson;
use glacierwatch_geo::transform::reproject_multipolygon;
use glacierwatch_raster::grid::{Bounds, Raster};
use glacierwatch_raster::mask::rasterize_mask;

const GLACIER_EPSG: u32 = 4326;

/// Snowline statistic: the 20th percentile of snow-pixel elevations.
const SNOWLINE_PERCENTILE: f64 = 20.0;

/// A glacier outline reprojected into a scene's CRS.
#[derive(Debug, Clone)]
pub struct GlacierGeometry {
    pub glacier_id: String,
    pub geometry: MultiPolygon<f64>,
}

/// Reproject glacier outlines into the scene raster's CRS and keep only
/// those falling entirely within its bounds. Glaciers outside are skipped
/// with a warning; that is a data-quality condition, not a failure.
pub fn included_glaciers(
    glaciers: &[Glacier],
    bounds: &Bounds,
    epsg: u32,
) -> Result<Vec<GlacierGeometry>> {
    let bounds_rect = Rect::new((bounds.minx, bounds.miny), (bounds.maxx, bounds.maxy));
    let bounds_polygon = bounds_rect.to_polygon();

    let mut included = Vec::new();
    for glacier in glaciers {
        let outline = multipolygon_from_geojson(&glacier.geometry)?;
        let projected = reproject_multipolygon(&outline, GLACIER_EPSG, epsg)?;

        if bounds_polygon.contains(&projected) {
            included.push(GlacierGeometry {
                glacier_id: glacier.glacier_id.clone(),
                geometry: projected,
            });
        } else {
            warn!(
                glacier_id = %glacier.glacier_id,
                "Glacier falls outside the scene raster, skipping"
            );
        }
    }
    Ok(included)
}

/// Cover geometry for clipping bands before per-glacier work: the union of
/// every included glacier's bounding box, each grown by `margin` on all
/// sides. The margin tolerates registration slack between products.
pub fn buffered_cover(glaciers: &[GlacierGeometry], margin: f64) -> Option<MultiPolygon<f64>> {
    let rects: Vec<_> = glaciers
        .iter()
        .filter_map(|g| g.geometry.bounding_rect())
        .map(|r| {
            Rect::new(
                (r.min().x - margin, r.min().y - margin),
                (r.max().x + margin, r.max().y + margin),
            )
            .to_polygon()
        })
        .collect();
    if rects.is_empty() {
        return None;
    }
    Some(MultiPolygon(rects))
}

/// Snow statistics for one glacier on the scene's mask and DEM grids.
///
/// The mask and DEM must share one grid. Snow area is the count of snow
/// pixels inside the (all-touched) glacier outline times the pixel area;
/// snowline is the 20th percentile of DEM values at valid snow pixels, NaN
/// when the glacier holds no snow.
fn analyze_glacier(
    glacier: &GlacierGeometry,
    mask: &Raster,
    dem: &Raster,
) -> Result<(f64, f64)> {
    if mask.data.dim() != dem.data.dim() {
        return Err(GlacierError::UnsupportedRaster {
            reason: "Snow mask and DEM grids differ".to_string(),
        });
    }

    let inside = rasterize_mask(
        &glacier.geometry,
        &mask.transform,
        mask.width(),
        mask.height(),
        true,
    );

    let pixel_area = mask.transform.pixel_area();
    let mut snow_pixels: usize = 0;
    let mut snow_elevations: Vec<f32> = Vec::new();

    for ((row, col), &is_inside) in inside.indexed_iter() {
        if !is_inside {
            continue;
        }
        let mask_value = mask.data[[row, col]];
        if mask_value != 1.0 {
            continue;
        }
        snow_pixels += 1;

        let elevation = dem.data[[row, col]];
        if dem.is_valid(elevation) {
            snow_elevations.push(elevation);
        }
    }

    let snow_area = snow_pixels as f64 * pixel_area;
    let snowline = percentile(&mut snow_elevations, SNOWLINE_PERCENTILE);
    Ok((snow_area, snowline))
}

/// Run the per-glacier analysis over every included glacier and aggregate
/// the scene total. A glacier that fails is logged and skipped; it never
/// aborts the scene.
pub fn analyze_glaciers(
    scene_id: &str,
    glaciers: &[GlacierGeometry],
    mask: &Raster,
    dem: &Raster,
) -> (SceneAnalysis, Vec<GlacierSnowRecord>) {
    let mut analysis = SceneAnalysis::new(scene_id);
    let mut records = Vec::with_capacity(glaciers.len());

    for glacier in glaciers {
        match analyze_glacier(glacier, mask, dem) {
            Ok((snow_area, snowline)) => {
                analysis.total_snow_area_m2 += snow_area;
                records.push(GlacierSnowRecord::new(
                    analysis.id,
                    &glacier.glacier_id,
                    scene_id,
                    snow_area,
                    snowline,
                ));
            }
            Err(e) => {
                warn!(
                    glacier_id = %glacier.glacier_id,
                    error = %e,
                    "Glacier analysis failed, skipping"
                );
            }
        }
    }

    (analysis, records)
}

/// Percentile with linear interpolation between closest ranks. NaN for an
/// empty sample.
fn percentile(values: &mut Vec<f32>, q: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));

    let rank = q / 100.0 * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return values[lower] as f64;
    }
    let weight = rank - lower as f64;
    values[lower] as f64 * (1.0 - weight) + values[upper] as f64 * weight
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glacierwatch_raster::grid::GeoTransform;
    use ndarray::Array2;

    fn grid_transform() -> GeoTransform {
        GeoTransform {
            origin_x: 0.0,
            origin_y: 100.0,
            pixel_width: 10.0,
            pixel_height: -10.0,
        }
    }

    fn raster(data: Array2<f32>) -> Raster {
        Raster {
            data,
            transform: grid_transform(),
            epsg: 32633,
            nodata: None,
        }
    }

    fn glacier_square(id: &str, minx: f64, miny: f64, maxx: f64, maxy: f64) -> GlacierGeometry {
        GlacierGeometry {
            glacier_id: id.to_string(),
            geometry: MultiPolygon(vec![
                Rect::new((minx, miny), (maxx, maxy)).to_polygon()
            ]),
        }
    }

    #[test]
    fn snowless_glacier_has_zero_area_and_nan_snowline() {
        let mask = raster(Array2::from_elem((10, 10), 0.0));
        let dem = raster(Array2::from_elem((10, 10), 1200.0));
        let glaciers = vec![glacier_square("g1", 10.0, 10.0, 90.0, 90.0)];

        let (analysis, records) = analyze_glaciers("scene-1", &glaciers, &mask, &dem);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].snow_area_m2, 0.0);
        assert!(records[0].snowline_elevation_m.is_nan());
        assert_eq!(analysis.total_snow_area_m2, 0.0);
    }

    #[test]
    fn snow_area_scales_with_pixel_area() {
        // Full-snow mask; glacier covers the whole 10x10 grid of 10 m pixels.
        let mask = raster(Array2::from_elem((10, 10), 1.0));
        let dem = raster(Array2::from_elem((10, 10), 900.0));
        let glaciers = vec![glacier_square("g1", 0.0, 0.0, 100.0, 100.0)];

        let (analysis, records) = analyze_glaciers("scene-1", &glaciers, &mask, &dem);
        assert_relative_eq!(records[0].snow_area_m2, 100.0 * 100.0);
        assert_relative_eq!(analysis.total_snow_area_m2, 100.0 * 100.0);
        assert_relative_eq!(records[0].snowline_elevation_m, 900.0);
    }

    #[test]
    fn snowline_is_the_20th_percentile_of_snow_elevations() {
        // One snow row of five pixels with elevations 100..500.
        let mut mask_data = Array2::from_elem((5, 5), 0.0);
        let mut dem_data = Array2::from_elem((5, 5), 0.0);
        for col in 0..5 {
            mask_data[[2, col]] = 1.0;
            dem_data[[2, col]] = 100.0 * (col as f32 + 1.0);
        }
        let mask = Raster {
            data: mask_data,
            transform: GeoTransform {
                origin_x: 0.0,
                origin_y: 50.0,
                pixel_width: 10.0,
                pixel_height: -10.0,
            },
            epsg: 32633,
            nodata: None,
        };
        let dem = Raster {
            transform: mask.transform,
            ..raster(dem_data)
        };
        let glaciers = vec![glacier_square("g1", 0.0, 0.0, 50.0, 50.0)];

        let (_, records) = analyze_glaciers("scene-1", &glaciers, &mask, &dem);
        // numpy-style interpolation over [100..500] at q=20 gives 180.
        assert_relative_eq!(records[0].snowline_elevation_m, 180.0);
    }

    #[test]
    fn invalid_mask_pixels_do_not_count_as_snow() {
        let mut mask_data = Array2::from_elem((10, 10), f32::NAN);
        mask_data[[5, 5]] = 1.0;
        let mask = raster(mask_data);
        let dem = raster(Array2::from_elem((10, 10), 700.0));
        let glaciers = vec![glacier_square("g1", 0.0, 0.0, 100.0, 100.0)];

        let (_, records) = analyze_glaciers("scene-1", &glaciers, &mask, &dem);
        assert_relative_eq!(records[0].snow_area_m2, 100.0);
    }

    #[test]
    fn glaciers_outside_raster_bounds_are_skipped() {
        let inside = Glacier {
            glacier_id: "inside".to_string(),
            name: "Inside".to_string(),
            geometry: r#"{"type": "Polygon", "coordinates": [[[10.0, 10.0], [90.0, 10.0], [90.0, 90.0], [10.0, 90.0], [10.0, 10.0]]]}"#.to_string(),
            area_m2: 6400.0,
        };
        let outside = Glacier {
            glacier_id: "outside".to_string(),
            name: "Outside".to_string(),
            geometry: r#"{"type": "Polygon", "coordinates": [[[500.0, 500.0], [600.0, 500.0], [600.0, 600.0], [500.0, 600.0], [500.0, 500.0]]]}"#.to_string(),
            area_m2: 10000.0,
        };

        // EPSG 4326 on both sides keeps reprojection an identity; the
        // outside square still fails the bounds check.
        let bounds = Bounds {
            minx: 0.0,
            miny: 0.0,
            maxx: 100.0,
            maxy: 100.0,
        };
        let included = included_glaciers(&[inside, outside], &bounds, 4326).unwrap();
        assert_eq!(included.len(), 1);
        assert_eq!(included[0].glacier_id, "inside");
    }

    #[test]
    fn buffered_cover_grows_each_outline() {
        let glaciers = vec![glacier_square("g1", 20.0, 20.0, 40.0, 40.0)];
        let cover = buffered_cover(&glaciers, 200.0).unwrap();
        let rect = cover.bounding_rect().unwrap();
        assert_relative_eq!(rect.min().x, -180.0);
        assert_relative_eq!(rect.max().x, 240.0);
        assert!(buffered_cover(&[], 200.0).is_none());
    }

    #[test]
    fn percentile_interpolates_linearly() {
        let mut values = vec![1.0_f32, 2.0, 3.0, 4.0];
        assert_relative_eq!(percentile(&mut values, 50.0), 2.5);
        assert_relative_eq!(percentile(&mut values, 0.0), 1.0);
        assert_relative_eq!(percentile(&mut values, 100.0), 4.0);
        assert!(percentile(&mut Vec::new(), 20.0).is_nan());
    }
}
