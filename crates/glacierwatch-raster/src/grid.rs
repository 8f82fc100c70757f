//! In-memory raster grid and georeferencing types.

use ndarray::Array2;

/// Affine transform from pixel to world coordinates.
///
/// North-up rasters only: `pixel_height` is negative and there is no
/// rotation term. Every product this pipeline touches satisfies that.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner of the upper-left pixel.
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner of the upper-left pixel.
    pub origin_y: f64,
    /// Pixel width in world units.
    pub pixel_width: f64,
    /// Pixel height in world units, negative for north-up data.
    pub pixel_height: f64,
}

impl GeoTransform {
    /// World coordinates of a pixel's upper-left corner.
    pub fn pixel_to_geo(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.origin_x + col * self.pixel_width,
            self.origin_y + row * self.pixel_height,
        )
    }

    /// Fractional pixel coordinates of a world point.
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    /// Transform describing a window at `(col_off, row_off)` of this grid.
    pub fn window_transform(&self, col_off: usize, row_off: usize) -> GeoTransform {
        let (origin_x, origin_y) = self.pixel_to_geo(col_off as f64, row_off as f64);
        GeoTransform {
            origin_x,
            origin_y,
            pixel_width: self.pixel_width,
            pixel_height: self.pixel_height,
        }
    }

    /// Area of one pixel in squared world units.
    pub fn pixel_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }
}

/// Axis-aligned world-coordinate bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl Bounds {
    /// Whether two bounds share any area.
    pub fn overlaps(&self, other: &Bounds) -> bool {
        self.minx < other.maxx
            && self.maxx > other.minx
            && self.miny < other.maxy
            && self.maxy > other.miny
    }

    /// Intersection of two bounds; caller must have checked `overlaps`.
    pub fn intersection(&self, other: &Bounds) -> Bounds {
        Bounds {
            minx: self.minx.max(other.minx),
            miny: self.miny.max(other.miny),
            maxx: self.maxx.min(other.maxx),
            maxy: self.maxy.min(other.maxy),
        }
    }

    /// Smallest bounds containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            minx: self.minx.min(other.minx),
            miny: self.miny.min(other.miny),
            maxx: self.maxx.max(other.maxx),
            maxy: self.maxy.max(other.maxy),
        }
    }
}

/// A pixel-space window into a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    /// Window covering `bounds` on a grid described by `transform`, rounded
    /// outward to whole pixels and clamped to the raster extent.
    pub fn from_bounds(
        bounds: &Bounds,
        transform: &GeoTransform,
        raster_width: usize,
        raster_height: usize,
    ) -> PixelWindow {
        let (col0, row0) = transform.geo_to_pixel(bounds.minx, bounds.maxy);
        let (col1, row1) = transform.geo_to_pixel(bounds.maxx, bounds.miny);

        let col_off = col0.floor().max(0.0) as usize;
        let row_off = row0.floor().max(0.0) as usize;
        let col_end = (col1.ceil() as usize).min(raster_width);
        let row_end = (row1.ceil() as usize).min(raster_height);

        PixelWindow {
            col_off,
            row_off,
            width: col_end.saturating_sub(col_off),
            height: row_end.saturating_sub(row_off),
        }
    }

    /// Grow the window by `pad` pixels on each side, clamped to the raster.
    pub fn padded(&self, pad: usize, raster_width: usize, raster_height: usize) -> PixelWindow {
        let col_off = self.col_off.saturating_sub(pad);
        let row_off = self.row_off.saturating_sub(pad);
        let col_end = (self.col_off + self.width + pad).min(raster_width);
        let row_end = (self.row_off + self.height + pad).min(raster_height);
        PixelWindow {
            col_off,
            row_off,
            width: col_end - col_off,
            height: row_end - row_off,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A single-band raster held in memory, with georeferencing.
#[derive(Debug, Clone)]
pub struct Raster {
    /// Pixel values, row-major, north to south.
    pub data: Array2<f32>,
    /// Pixel-to-world transform.
    pub transform: GeoTransform,
    /// EPSG code of the CRS.
    pub epsg: u32,
    /// Sentinel marking invalid pixels, when defined.
    pub nodata: Option<f32>,
}

impl Raster {
    pub fn width(&self) -> usize {
        self.data.ncols()
    }

    pub fn height(&self) -> usize {
        self.data.nrows()
    }

    /// World-coordinate bounds of the full grid.
    pub fn bounds(&self) -> Bounds {
        let (maxx, miny) = self
            .transform
            .pixel_to_geo(self.width() as f64, self.height() as f64);
        Bounds {
            minx: self.transform.origin_x,
            miny,
            maxx,
            maxy: self.transform.origin_y,
        }
    }

    /// Whether a value is a real measurement.
    pub fn is_valid(&self, value: f32) -> bool {
        value.is_finite() && self.nodata.map_or(true, |nd| value != nd)
    }

    /// Count of valid pixels.
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|&&v| self.is_valid(v)).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array2;

    fn transform() -> GeoTransform {
        GeoTransform {
            origin_x: 100.0,
            origin_y: 500.0,
            pixel_width: 10.0,
            pixel_height: -10.0,
        }
    }

    #[test]
    fn pixel_geo_round_trip() {
        let t = transform();
        let (x, y) = t.pixel_to_geo(3.0, 4.0);
        assert_relative_eq!(x, 130.0);
        assert_relative_eq!(y, 460.0);
        let (col, row) = t.geo_to_pixel(x, y);
        assert_relative_eq!(col, 3.0);
        assert_relative_eq!(row, 4.0);
    }

    #[test]
    fn window_from_bounds_rounds_outward_and_clamps() {
        let t = transform();
        let bounds = Bounds {
            minx: 115.0,
            miny: 455.0,
            maxx: 145.0,
            maxy: 485.0,
        };
        let window = PixelWindow::from_bounds(&bounds, &t, 20, 20);
        assert_eq!(window.col_off, 1);
        assert_eq!(window.row_off, 1);
        assert_eq!(window.width, 4);
        assert_eq!(window.height, 4);

        let padded = window.padded(2, 20, 20);
        assert_eq!(padded.col_off, 0);
        assert_eq!(padded.row_off, 0);
        assert_eq!(padded.width, 7);
        assert_eq!(padded.height, 7);
    }

    #[test]
    fn padding_clamps_at_raster_edge() {
        let window = PixelWindow {
            col_off: 18,
            row_off: 18,
            width: 2,
            height: 2,
        };
        let padded = window.padded(5, 20, 20);
        assert_eq!(padded.col_off, 13);
        assert_eq!(padded.row_off, 13);
        assert_eq!(padded.width, 7);
        assert_eq!(padded.height, 7);
    }

    #[test]
    fn raster_bounds_and_validity() {
        let raster = Raster {
            data: Array2::from_shape_vec((2, 2), vec![1.0, -9999.0, f32::NAN, 4.0]).unwrap(),
            transform: transform(),
            epsg: 32633,
            nodata: Some(-9999.0),
        };
        let bounds = raster.bounds();
        assert_relative_eq!(bounds.minx, 100.0);
        assert_relative_eq!(bounds.maxx, 120.0);
        assert_relative_eq!(bounds.miny, 480.0);
        assert_relative_eq!(bounds.maxy, 500.0);
        assert_eq!(raster.valid_count(), 2);
    }

    #[test]
    fn bounds_overlap_and_union() {
        let a = Bounds {
            minx: 0.0,
            miny: 0.0,
            maxx: 10.0,
            maxy: 10.0,
        };
        let b = Bounds {
            minx: 5.0,
            miny: 5.0,
            maxx: 15.0,
            maxy: 15.0,
        };
        let c = Bounds {
            minx: 20.0,
            miny: 20.0,
            maxx: 30.0,
            maxy: 30.0,
        };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        let i = a.intersection(&b);
        assert_eq!((i.minx, i.miny, i.maxx, i.maxy), (5.0, 5.0, 10.0, 10.0));
        let u = a.union(&c);
        assert_eq!((u.minx, u.miny, u.maxx, u.maxy), (0.0, 0.0, 30.0, 30.0));
    }
}
