//! Download worker: claims queued scenes and fetches their band assets.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info};

use glacierwatch_core::config::AppConfig;
use glacierwatch_core::models::{Scene, SceneStatus, SceneTransition, Stage};
use glacierwatch_store::{PostgresStore, SceneQueue};

use crate::auth::TokenCache;
use crate::cli::DownloadArgs;
use crate::commands::Outcome;
use crate::paths;
use crate::stac::StacClient;

const IDLE_SLEEP: Duration = Duration::from_secs(30);
const WORK_SLEEP: Duration = Duration::from_secs(5);

pub async fn execute(args: DownloadArgs) -> Result<()> {
    let app = AppConfig::from_env()?;
    let store = PostgresStore::with_migrations(&app.database_url).await?;
    let http = reqwest::Client::new();
    let stac = StacClient::new(http.clone(), &app.stac_url);
    let auth = TokenCache::new(http, &app);

    loop {
        let outcome = download_one(&app, &store, &stac, &auth).await;
        if args.once {
            break;
        }
        match outcome {
            Outcome::Success | Outcome::Failure => tokio::time::sleep(WORK_SLEEP).await,
            Outcome::NoScene => {
                info!("No scenes to download, waiting for new work");
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
    Ok(())
}

/// Claim and handle one scene. Errors after a claim always end in a `fail`
/// transition so the scene is never left stuck in `downloading`.
async fn download_one(
    app: &AppConfig,
    store: &PostgresStore,
    stac: &StacClient,
    auth: &TokenCache,
) -> Outcome {
    let claimed = match claim_next(store).await {
        Ok(scene) => scene,
        Err(e) => {
            error!(error = %e, "Claim failed");
            return Outcome::Failure;
        }
    };
    let Some(scene) = claimed else {
        return Outcome::NoScene;
    };

    info!(
        scene_id = %scene.scene_id,
        project_id = %scene.project_id,
        "Downloading scene assets"
    );
    let folder = paths::raw_folder(&app.data_folder, &scene.project_id, &scene.scene_id);

    match fetch_assets(stac, auth, &scene, &folder).await {
        Ok(()) => {
            let transition = SceneTransition::ReadyForProcessing {
                download_path: folder,
            };
            if let Err(e) = store.commit(&scene, transition).await {
                error!(scene_id = %scene.scene_id, error = %e, "Commit failed");
                return Outcome::Failure;
            }
            Outcome::Success
        }
        Err(e) => {
            error!(
                scene_id = %scene.scene_id,
                project_id = %scene.project_id,
                error = %e,
                "Scene download failed"
            );
            let transition = SceneTransition::FailedDownload {
                error: e.to_string(),
            };
            if let Err(e) = store.fail(&scene, transition).await {
                error!(scene_id = %scene.scene_id, error = %e, "Fail transition failed");
            }
            Outcome::Failure
        }
    }
}

async fn claim_next(store: &PostgresStore) -> glacierwatch_core::Result<Option<Scene>> {
    if let Some(scene) = store
        .claim(SceneStatus::QueuedForDownload, SceneStatus::Downloading)
        .await?
    {
        return Ok(Some(scene));
    }
    info!("No queued scenes, checking for reattempts");
    store
        .reattempt(Stage::Download, Stage::Download.default_max_attempts())
        .await
}

async fn fetch_assets(
    stac: &StacClient,
    auth: &TokenCache,
    scene: &Scene,
    folder: &Path,
) -> glacierwatch_core::Result<()> {
    paths::prepare_folder(folder)?;
    for (band, href) in &scene.assets {
        info!(band, href, "Downloading band asset");
        stac.download_asset(href, &paths::band_file(folder, band), Some(auth))
            .await?;
    }
    Ok(())
}
