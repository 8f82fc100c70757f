//! Polygon rasterization.

use geo::{Contains, Intersects, MultiPolygon, Point, Rect};
use ndarray::Array2;

use crate::grid::GeoTransform;

/// Rasterize a polygon onto a pixel grid, returning `true` for pixels
/// inside the geometry.
///
/// With `all_touched`, any pixel whose footprint overlaps the polygon
/// boundary counts as inside; otherwise membership is decided by the pixel
/// center. Pixels outside the polygon's bounding box are skipped without a
/// geometry test.
pub fn rasterize_mask(
    geometry: &MultiPolygon<f64>,
    transform: &GeoTransform,
    width: usize,
    height: usize,
    all_touched: bool,
) -> Array2<bool> {
    use geo::BoundingRect;

    let mut mask = Array2::from_elem((height, width), false);
    let Some(bbox) = geometry.bounding_rect() else {
        return mask;
    };

    // Pixel range the geometry can possibly touch.
    let (col0, row0) = transform.geo_to_pixel(bbox.min().x, bbox.max().y);
    let (col1, row1) = transform.geo_to_pixel(bbox.max().x, bbox.min().y);
    let col_start = col0.floor().max(0.0) as usize;
    let row_start = row0.floor().max(0.0) as usize;
    let col_end = (col1.ceil().max(0.0) as usize).min(width);
    let row_end = (row1.ceil().max(0.0) as usize).min(height);

    for row in row_start..row_end {
        for col in col_start..col_end {
            let (x0, y0) = transform.pixel_to_geo(col as f64, row as f64);
            let (x1, y1) = transform.pixel_to_geo((col + 1) as f64, (row + 1) as f64);

            let inside = if all_touched {
                let pixel =
                    Rect::new((x0.min(x1), y0.min(y1)), (x0.max(x1), y0.max(y1))).to_polygon();
                geometry.intersects(&pixel)
            } else {
                let center = Point::new((x0 + x1) / 2.0, (y0 + y1) / 2.0);
                geometry.contains(&center)
            };

            if inside {
                mask[[row, col]] = true;
            }
        }
    }

    mask
}
