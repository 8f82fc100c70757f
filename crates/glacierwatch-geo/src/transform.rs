//! CRS transformation.

use geo::{Coord, Geometry, MapCoords, MultiPolygon};
use glacierwatch_core::error::{GlacierError, Result};
use proj::Proj;

/// Reproject a geometry between EPSG codes. Identity when the codes match.
pub fn reproject_geometry(
    geometry: &Geometry<f64>,
    from_epsg: u32,
    to_epsg: u32,
) -> Result<Geometry<f64>> {
    if from_epsg == to_epsg {
        return Ok(geometry.clone());
    }

    let proj = projection(from_epsg, to_epsg)?;
    geometry.try_map_coords(|coord| convert(&proj, coord))
}

/// Reproject a multipolygon between EPSG codes. Identity when the codes match.
pub fn reproject_multipolygon(
    geometry: &MultiPolygon<f64>,
    from_epsg: u32,
    to_epsg: u32,
) -> Result<MultiPolygon<f64>> {
    if from_epsg == to_epsg {
        return Ok(geometry.clone());
    }

    let proj = projection(from_epsg, to_epsg)?;
    geometry.try_map_coords(|coord| convert(&proj, coord))
}

/// A reusable point transform between two EPSG codes.
///
/// Builds the projection once; identity transforms carry no projection at
/// all. Used for per-pixel work where building a `Proj` per call would
/// dominate the cost.
pub struct Reprojector {
    proj: Option<Proj>,
}

impl Reprojector {
    pub fn new(from_epsg: u32, to_epsg: u32) -> Result<Self> {
        let proj = if from_epsg == to_epsg {
            None
        } else {
            Some(projection(from_epsg, to_epsg)?)
        };
        Ok(Self { proj })
    }

    pub fn convert(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        match &self.proj {
            None => Ok((x, y)),
            Some(proj) => proj.convert((x, y)).map_err(|e| GlacierError::Projection {
                reason: format!("Projection failed at ({x}, {y}): {e}"),
            }),
        }
    }
}

fn projection(from_epsg: u32, to_epsg: u32) -> Result<Proj> {
    Proj::new_known_crs(&format!("EPSG:{from_epsg}"), &format!("EPSG:{to_epsg}"), None).map_err(
        |e| GlacierError::Projection {
            reason: format!("Cannot build EPSG:{from_epsg} -> EPSG:{to_epsg} transform: {e}"),
        },
    )
}

fn convert(proj: &Proj, coord: Coord<f64>) -> Result<Coord<f64>> {
    let (x, y) = proj
        .convert((coord.x, coord.y))
        .map_err(|e| GlacierError::Projection {
            reason: format!("Projection failed at ({}, {}): {e}", coord.x, coord.y),
        })?;
    Ok(Coord { x, y })
}
