//! DEM tile selection.
//!
//! Given an AOI and the candidate elevation tiles a catalog search returned,
//! pick a minimal set of tiles covering the AOI above a target fraction.
//! This is a coverage heuristic with early termination, not an optimal
//! set-cover solver; catalogs return single-digit candidate counts in
//! practice, so the combinatorial search stays cheap.

use chrono::{DateTime, Utc};
use geo::{Area, BooleanOps, Intersects, MultiPolygon, Rect};
use glacierwatch_core::error::{GlacierError, Result};
use itertools::Itertools;
use tracing::{debug, info};

use crate::transform::reproject_multipolygon;

const AOI_EPSG: u32 = 4326;

/// One elevation-tile entry from the DEM catalog.
#[derive(Debug, Clone)]
pub struct DemCandidate {
    /// Catalog item identifier.
    pub id: String,

    /// EPSG code of the tile's native CRS.
    pub epsg: u32,

    /// Bounding box in the tile's native CRS.
    pub bbox: Rect<f64>,

    /// Precise data footprint, when the catalog provides one.
    pub footprint: Option<MultiPolygon<f64>>,

    /// Fraction of the tile holding valid data.
    pub data_fraction: f64,

    /// When the tile was produced.
    pub created: DateTime<Utc>,

    /// Resolvable URL of the elevation asset.
    pub asset_href: String,
}

impl DemCandidate {
    /// Geometry used for coverage computation: the precise footprint if
    /// available, else the bounding box.
    fn coverage_geometry(&self) -> MultiPolygon<f64> {
        match &self.footprint {
            Some(footprint) => footprint.clone(),
            None => MultiPolygon(vec![self.bbox.to_polygon()]),
        }
    }
}

/// Select the tiles covering `aoi` above `target_coverage`.
///
/// Candidates must share one CRS; the AOI (EPSG:4326) is reprojected into
/// it before any area computation. Returns the first (smallest) combination
/// of candidates, in descending `(coverage, data_fraction, created)` order,
/// whose union reaches the target; if none does, the best-covering
/// combination seen.
pub fn select_dem_tiles<'a>(
    aoi: &MultiPolygon<f64>,
    candidates: &'a [DemCandidate],
    target_coverage: f64,
) -> Result<Vec<&'a DemCandidate>> {
    let epsg = common_epsg(candidates)?;

    let aoi_proj = reproject_multipolygon(aoi, AOI_EPSG, epsg)?;
    let aoi_area = aoi_proj.unsigned_area();
    if aoi_area == 0.0 {
        return Err(GlacierError::EmptyAoi);
    }

    let mut scored: Vec<(&DemCandidate, f64)> = Vec::new();
    for candidate in candidates {
        let geometry = candidate.coverage_geometry();
        if !geometry.intersects(&aoi_proj) {
            continue;
        }
        let intersection = geometry.intersection(&aoi_proj).unsigned_area();
        let coverage = intersection / aoi_area;
        debug!(
            item = %candidate.id,
            coverage = format_args!("{coverage:.4}"),
            "DEM candidate coverage"
        );
        scored.push((candidate, coverage));
    }

    if scored.is_empty() {
        return Err(GlacierError::NoDemCandidates);
    }

    // Prefer fuller coverage, then fuller tiles, then fresher tiles.
    scored.sort_by(|a, b| {
        b.1.total_cmp(&a.1)
            .then(b.0.data_fraction.total_cmp(&a.0.data_fraction))
            .then(b.0.created.cmp(&a.0.created))
    });

    if scored[0].1 >= target_coverage {
        info!(
            item = %scored[0].0.id,
            coverage = format_args!("{:.4}", scored[0].1),
            "Selected single DEM tile"
        );
        return Ok(vec![scored[0].0]);
    }

    let mut best: Option<(f64, Vec<&DemCandidate>)> = None;
    for r in 1..=scored.len() {
        for combo in scored.iter().combinations(r) {
            let union = combo
                .iter()
                .map(|(candidate, _)| candidate.coverage_geometry())
                .reduce(|acc, geom| acc.union(&geom))
                .expect("combinations are non-empty");
            let coverage = union.intersection(&aoi_proj).unsigned_area() / aoi_area;

            let chosen: Vec<&DemCandidate> =
                combo.iter().map(|(candidate, _)| *candidate).collect();

            if best.as_ref().map_or(true, |(c, _)| coverage > *c) {
                best = Some((coverage, chosen.clone()));
            }

            if coverage >= target_coverage {
                info!(
                    tiles = chosen.len(),
                    coverage = format_args!("{coverage:.4}"),
                    "Selected DEM tile combination"
                );
                return Ok(chosen);
            }
        }
    }

    let (coverage, chosen) = best.expect("at least one combination was scored");
    info!(
        tiles = chosen.len(),
        coverage = format_args!("{coverage:.4}"),
        "No combination reaches target coverage, using best found"
    );
    Ok(chosen)
}

/// All candidates must agree on one CRS before any geometry computation.
fn common_epsg(candidates: &[DemCandidate]) -> Result<u32> {
    let mut epsg = None;
    for candidate in candidates {
        match epsg {
            None => epsg = Some(candidate.epsg),
            Some(expected) if expected != candidate.epsg => {
                return Err(GlacierError::CrsMismatch {
                    expected,
                    found: candidate.epsg,
                })
            }
            Some(_) => {}
        }
    }
    epsg.ok_or(GlacierError::NoDemCandidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo::polygon;

    fn aoi() -> MultiPolygon<f64> {
        MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]])
    }

    fn candidate(id: &str, minx: f64, maxx: f64, data_fraction: f64) -> DemCandidate {
        DemCandidate {
            id: id.to_string(),
            epsg: 4326,
            bbox: Rect::new((minx, 0.0), (maxx, 10.0)),
            footprint: None,
            data_fraction,
            created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            asset_href: format!("https://tiles.example/{id}.tif"),
        }
    }

    #[test]
    fn single_full_cover_candidate_is_returned_alone() {
        let candidates = vec![
            candidate("full", -1.0, 11.0, 0.9),
            candidate("partial", 0.0, 5.0, 1.0),
        ];
        let selected = select_dem_tiles(&aoi(), &candidates, 0.99).unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].id, "full");
    }

    #[test]
    fn exact_pair_wins_over_larger_supersets() {
        // Two halves cover the AOI together; an overlapping middle tile has
        // higher single coverage but cannot complete a pair.
        let candidates = vec![
            candidate("west", 0.0, 5.0, 1.0),
            candidate("east", 5.0, 10.0, 0.9),
            candidate("middle", 2.0, 8.0, 0.1),
        ];
        let selected = select_dem_tiles(&aoi(), &candidates, 0.99).unwrap();
        let mut ids: Vec<&str> = selected.iter().map(|c| c.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["east", "west"]);
    }

    #[test]
    fn mismatched_epsg_is_a_configuration_error() {
        let mut candidates = vec![candidate("a", 0.0, 5.0, 1.0), candidate("b", 5.0, 10.0, 1.0)];
        candidates[1].epsg = 32633;
        let err = select_dem_tiles(&aoi(), &candidates, 0.99).unwrap_err();
        assert!(matches!(
            err,
            GlacierError::CrsMismatch {
                expected: 4326,
                found: 32633
            }
        ));
    }

    #[test]
    fn disjoint_candidates_are_an_error() {
        let candidates = vec![candidate("far", 100.0, 110.0, 1.0)];
        let err = select_dem_tiles(&aoi(), &candidates, 0.99).unwrap_err();
        assert!(matches!(err, GlacierError::NoDemCandidates));
    }

    #[test]
    fn no_candidates_is_an_error() {
        let err = select_dem_tiles(&aoi(), &[], 0.99).unwrap_err();
        assert!(matches!(err, GlacierError::NoDemCandidates));
    }

    #[test]
    fn falls_back_to_best_coverage_when_target_unreachable() {
        let candidates = vec![
            candidate("west", 0.0, 5.0, 1.0),
            candidate("sliver", 0.0, 1.0, 1.0),
        ];
        let selected = select_dem_tiles(&aoi(), &candidates, 0.99).unwrap();
        // Best reachable union is both tiles (coverage 0.5), found at r=2;
        // the single west tile ties it, so the first best seen is kept.
        assert!(!selected.is_empty());
        assert!(selected.iter().any(|c| c.id == "west"));
    }

    #[test]
    fn footprint_beats_bbox_for_coverage() {
        // The bbox spans the whole AOI but the footprint only covers the
        // west half, so a full-cover bbox alone must not satisfy the target.
        let mut half_footprint = candidate("masked", 0.0, 10.0, 1.0);
        half_footprint.footprint = Some(MultiPolygon(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 5.0, y: 0.0),
            (x: 5.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]]));
        let candidates = vec![half_footprint, candidate("east", 5.0, 10.0, 1.0)];
        let selected = select_dem_tiles(&aoi(), &candidates, 0.99).unwrap();
        assert_eq!(selected.len(), 2);
    }
}
