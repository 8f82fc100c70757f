//! Project DEM acquisition: tile selection, remote clipping, mosaicking.

use std::path::PathBuf;

use anyhow::Result;
use geo::MultiPolygon;
use tracing::{info, warn};

use glacierwatch_core::config::{AppConfig, ProjectConfig};
use glacierwatch_core::error::GlacierError;
use glacierwatch_geo::dem_select::{select_dem_tiles, DemCandidate};
use glacierwatch_geo::geometry::{bounding_rect, multipolygon_from_geojson, pad_bounds};
use glacierwatch_raster::clip::{clip_to_aoi, ClipParams};
use glacierwatch_raster::mosaic::mosaic_files;
use glacierwatch_raster::remote::{probe_cog, HttpRangeReader};
use glacierwatch_store::{PostgresStore, ProjectStore};

use crate::cli::DemArgs;
use crate::paths;
use crate::stac::{dem_candidate_from_item, StacClient};

const DEM_COLLECTION: &str = "arcticdem-mosaics-v3.0-10m";
const DEM_ASSET_KEY: &str = "dem";
const SEARCH_PAD_DEG: f64 = 0.1;

pub async fn execute(args: DemArgs) -> Result<()> {
    let app = AppConfig::from_env()?;
    let store = PostgresStore::with_migrations(&app.database_url).await?;
    let project_config = ProjectConfig::load(&app.data_folder, &args.project_id)?;
    let stac = StacClient::new(reqwest::Client::new(), &app.dem_stac_url);

    let project = store
        .get_project(&args.project_id)
        .await?
        .ok_or_else(|| GlacierError::ProjectNotFound {
            project_id: args.project_id.clone(),
        })?;
    let aoi = multipolygon_from_geojson(&project.area_of_interest)?;

    let rect = bounding_rect(&aoi)?;
    let (minx, miny, maxx, maxy) = pad_bounds(
        (rect.min().x, rect.min().y, rect.max().x, rect.max().y),
        SEARCH_PAD_DEG,
    );
    let items = stac
        .search_dem(DEM_COLLECTION, [minx, miny, maxx, maxy])
        .await?;

    let candidates: Vec<DemCandidate> = items
        .iter()
        .filter_map(|item| dem_candidate_from_item(item, DEM_ASSET_KEY))
        .collect();
    info!(
        candidates = candidates.len(),
        project_id = %project.project_id,
        "DEM candidates found"
    );

    let selected: Vec<DemCandidate> =
        select_dem_tiles(&aoi, &candidates, project_config.dem_coverage_target)?
            .into_iter()
            .cloned()
            .collect();

    let temp = paths::prepare_folder(&paths::temp_folder(&app.data_folder))?;
    let mut clipped = Vec::new();
    for (index, tile) in selected.iter().enumerate() {
        let out = temp.join(format!("dem_clip_{index}.tif"));
        match clip_tile(&stac, tile, &aoi, &out, &temp, index).await? {
            Some(path) => clipped.push(path),
            None => warn!(item = %tile.id, "Tile produced an empty clip, skipping"),
        }
    }

    let dem_path = paths::dem_path(&app.data_folder, &project.project_id);
    let written = tokio::task::spawn_blocking(move || mosaic_files(&clipped, &dem_path))
        .await
        .map_err(|e| GlacierError::Serialization(format!("Mosaic task panicked: {e}")))??;

    paths::cleanup_folder(&temp)?;
    info!(dem = %written.display(), "Project DEM written");
    Ok(())
}

/// Clip one selected tile to the AOI, range-reading it in place when the
/// asset is a COG, downloading it first when not.
async fn clip_tile(
    stac: &StacClient,
    tile: &DemCandidate,
    aoi: &MultiPolygon<f64>,
    out: &std::path::Path,
    temp: &std::path::Path,
    index: usize,
) -> Result<Option<PathBuf>> {
    let href = tile.asset_href.clone();
    let aoi = aoi.clone();
    let out = out.to_path_buf();

    let is_cog = {
        let href = href.clone();
        tokio::task::spawn_blocking(move || {
            let client = reqwest::blocking::Client::new();
            probe_cog(&client, &href, None).map(|probe| probe.is_cog())
        })
        .await
        .map_err(|e| GlacierError::Serialization(format!("Probe task panicked: {e}")))??
    };

    if is_cog {
        info!(item = %tile.id, "Clipping tile through ranged reads");
        let result = tokio::task::spawn_blocking(move || {
            let client = reqwest::blocking::Client::new();
            let reader = HttpRangeReader::open(client, &href, None)?;
            clip_to_aoi(reader, &href, &aoi, 4326, &out, ClipParams::default())
        })
        .await
        .map_err(|e| GlacierError::Serialization(format!("Clip task panicked: {e}")))??;
        Ok(result)
    } else {
        info!(item = %tile.id, "Asset is not range-readable, downloading fully");
        let local = temp.join(format!("dem_raw_{index}.tif"));
        stac.download_asset(&href, &local, None).await?;
        let result = tokio::task::spawn_blocking(move || {
            let file = std::fs::File::open(&local)?;
            clip_to_aoi(
                std::io::BufReader::new(file),
                &href,
                &aoi,
                4326,
                &out,
                ClipParams::default(),
            )
        })
        .await
        .map_err(|e| GlacierError::Serialization(format!("Clip task panicked: {e}")))??;
        Ok(result)
    }
}
