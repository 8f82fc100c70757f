//! GeoJSON parsing and small geometry helpers.

use geo::{Geometry, MultiPolygon, Rect};
use glacierwatch_core::error::{GlacierError, Result};

/// Parse a GeoJSON string into a MultiPolygon.
///
/// Accepts a bare geometry or a feature; a single Polygon is promoted to a
/// one-member MultiPolygon. Anything else is rejected, since AOIs and
/// glacier outlines are areal by definition.
pub fn multipolygon_from_geojson(content: &str) -> Result<MultiPolygon<f64>> {
    let parsed: geojson::GeoJson = content.parse().map_err(|e| GlacierError::InvalidGeometry {
        reason: format!("Failed to parse GeoJSON: {e}"),
    })?;

    let geometry = match parsed {
        geojson::GeoJson::Geometry(g) => g,
        geojson::GeoJson::Feature(f) => f.geometry.ok_or_else(|| GlacierError::InvalidGeometry {
            reason: "Feature has no geometry".to_string(),
        })?,
        geojson::GeoJson::FeatureCollection(_) => {
            return Err(GlacierError::InvalidGeometry {
                reason: "Expected a single geometry, got a FeatureCollection".to_string(),
            })
        }
    };

    multipolygon_from_geojson_geometry(&geometry)
}

/// Convert an already-parsed GeoJSON geometry into a MultiPolygon.
pub fn multipolygon_from_geojson_geometry(
    geometry: &geojson::Geometry,
) -> Result<MultiPolygon<f64>> {
    let geom: Geometry<f64> =
        geometry
            .value
            .clone()
            .try_into()
            .map_err(|e| GlacierError::InvalidGeometry {
                reason: format!("Unsupported GeoJSON geometry: {e}"),
            })?;

    match geom {
        Geometry::Polygon(p) => Ok(MultiPolygon(vec![p])),
        Geometry::MultiPolygon(mp) => Ok(mp),
        other => Err(GlacierError::InvalidGeometry {
            reason: format!("Expected (Multi)Polygon, got {other:?}"),
        }),
    }
}

/// Axis-aligned bounding rectangle of a multipolygon.
pub fn bounding_rect(geometry: &MultiPolygon<f64>) -> Result<Rect<f64>> {
    use geo::BoundingRect;
    geometry
        .bounding_rect()
        .ok_or(GlacierError::InvalidGeometry {
            reason: "Geometry has no bounding rectangle".to_string(),
        })
}

/// Pad a `(minx, miny, maxx, maxy)` bounds tuple on all sides.
///
/// Catalog bbox searches use this to avoid dropping tiles that only graze
/// the AOI edge.
pub fn pad_bounds(bounds: (f64, f64, f64, f64), pad: f64) -> (f64, f64, f64, f64) {
    let (minx, miny, maxx, maxy) = bounds;
    (minx - pad, miny - pad, maxx + pad, maxy + pad)
}
