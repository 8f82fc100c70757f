//! Scene discovery: search the imagery catalog and queue new scenes.

use std::collections::{HashMap, HashSet};

use anyhow::Result;
use chrono::{Duration, Utc};
use geo::Contains;
use tracing::{info, warn};

use glacierwatch_core::config::{AppConfig, ProjectConfig};
use glacierwatch_core::error::GlacierError;
use glacierwatch_core::models::Scene;
use glacierwatch_geo::geometry::{multipolygon_from_geojson, multipolygon_from_geojson_geometry};
use glacierwatch_store::{PostgresStore, ProjectStore, SceneQueue};

use crate::cli::DiscoverArgs;
use crate::stac::{StacClient, StacItem};

const IMAGERY_COLLECTION: &str = "sentinel-2-l2a";

pub async fn execute(args: DiscoverArgs) -> Result<()> {
    let app = AppConfig::from_env()?;
    let store = PostgresStore::with_migrations(&app.database_url).await?;
    let project_config = ProjectConfig::load(&app.data_folder, &args.project_id)?;
    let stac = StacClient::new(reqwest::Client::new(), &app.stac_url);

    let project = store
        .get_project(&args.project_id)
        .await?
        .ok_or_else(|| GlacierError::ProjectNotFound {
            project_id: args.project_id.clone(),
        })?;
    let aoi = multipolygon_from_geojson(&project.area_of_interest)?;

    let date_to = args.date_to.unwrap_or_else(|| Utc::now().date_naive());
    let date_from = args.date_from.unwrap_or(date_to - Duration::days(30));
    let datetime = format!("{date_from}/{date_to}");

    let items = stac
        .search_imagery(
            IMAGERY_COLLECTION,
            &aoi,
            &datetime,
            project_config.cloud_cover_threshold,
        )
        .await?;
    info!(
        items = items.len(),
        project_id = %project.project_id,
        datetime,
        "Catalog search finished"
    );

    let ids: Vec<String> = items.iter().map(|item| item.id.clone()).collect();
    let known: HashSet<String> = store.known_scene_ids(&ids).await?.into_iter().collect();

    let mut scenes = Vec::new();
    for item in items.iter().filter(|item| !known.contains(&item.id)) {
        if let Some(scene) = scene_from_item(item, &project.project_id, &aoi, &project_config) {
            scenes.push(scene);
        }
    }

    let inserted = store.add_scenes(&scenes).await?;
    info!(
        inserted,
        project_id = %project.project_id,
        "Queued new scenes for download"
    );
    Ok(())
}

/// Turn a catalog item into a queued scene, or skip it (logged) when it
/// does not fully cover the AOI or lacks a configured band asset.
fn scene_from_item(
    item: &StacItem,
    project_id: &str,
    aoi: &geo::MultiPolygon<f64>,
    config: &ProjectConfig,
) -> Option<Scene> {
    let footprint = match multipolygon_from_geojson_geometry(&item.geometry) {
        Ok(footprint) => footprint,
        Err(e) => {
            warn!(scene_id = %item.id, error = %e, "Scene has unusable footprint, skipping");
            return None;
        }
    };
    if !footprint.contains(aoi) {
        warn!(scene_id = %item.id, "Scene does not fully cover the AOI, skipping");
        return None;
    }

    let Some(acquired) = item.datetime() else {
        warn!(scene_id = %item.id, "Scene has no acquisition datetime, skipping");
        return None;
    };

    let mut assets = HashMap::new();
    for band in &config.bands {
        match item
            .assets
            .get(band)
            .and_then(crate::stac::StacAsset::resolved_href)
        {
            Some(href) => {
                assets.insert(band.clone(), href);
            }
            None => {
                warn!(scene_id = %item.id, band, "Scene is missing a configured band, skipping");
                return None;
            }
        }
    }

    info!(scene_id = %item.id, bands = assets.len(), "Discovered new scene");
    Some(Scene::discovered(&item.id, project_id, assets, acquired))
}
