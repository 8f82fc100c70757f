//! Processing worker: claims downloaded scenes, runs the snow analysis,
//! and persists per-glacier results.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};

use glacierwatch_analysis::ndsi::{compute_ndsi, snow_mask};
use glacierwatch_analysis::snow::{analyze_glaciers, buffered_cover, included_glaciers};
use glacierwatch_core::config::{AppConfig, ProjectConfig};
use glacierwatch_core::error::GlacierError;
use glacierwatch_core::models::{
    Glacier, GlacierSnowRecord, Scene, SceneAnalysis, SceneStatus, SceneTransition, Stage,
};
use glacierwatch_raster::clip::{clip_to_aoi, ClipParams};
use glacierwatch_raster::geotiff::{open_file, write_geotiff, write_geotiff_multiband};
use glacierwatch_raster::grid::{Bounds, Raster};
use glacierwatch_raster::resample::reproject_match;
use glacierwatch_store::{PostgresStore, ProjectStore, SceneQueue};

use crate::cli::ProcessArgs;
use crate::commands::Outcome;
use crate::paths;

const IDLE_SLEEP: Duration = Duration::from_secs(30);
const SUCCESS_SLEEP: Duration = Duration::from_secs(5);
const FAILURE_SLEEP: Duration = Duration::from_secs(10);

pub async fn execute(args: ProcessArgs) -> Result<()> {
    let app = AppConfig::from_env()?;
    let store = PostgresStore::with_migrations(&app.database_url).await?;

    loop {
        let outcome = process_one(&app, &store, &args).await;
        if args.once || args.dry_run {
            break;
        }
        match outcome {
            Outcome::Success => tokio::time::sleep(SUCCESS_SLEEP).await,
            Outcome::Failure => {
                info!("Processing failed, waiting before retrying");
                tokio::time::sleep(FAILURE_SLEEP).await;
            }
            Outcome::NoScene => {
                info!("No scenes to process, waiting for new work");
                tokio::time::sleep(IDLE_SLEEP).await;
            }
        }
    }
    Ok(())
}

/// Handle one scene. Errors after a claim always end in a `fail`
/// transition so the scene is never left stuck in `processing`.
async fn process_one(app: &AppConfig, store: &PostgresStore, args: &ProcessArgs) -> Outcome {
    let claimed = match next_scene(store, args).await {
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
        dry_run = args.dry_run,
        "Processing scene"
    );

    match analyze_scene(app, store, &scene, args.dry_run).await {
        Ok(()) => {
            info!(scene_id = %scene.scene_id, "Finished processing scene");
            Outcome::Success
        }
        Err(e) => {
            error!(
                scene_id = %scene.scene_id,
                project_id = %scene.project_id,
                error = %e,
                "Scene processing failed"
            );
            if !args.dry_run {
                let transition = SceneTransition::FailedProcessing {
                    error: e.to_string(),
                };
                if let Err(e) = store.fail(&scene, transition).await {
                    error!(scene_id = %scene.scene_id, error = %e, "Fail transition failed");
                }
            }
            Outcome::Failure
        }
    }
}

/// Pick the next scene: dry runs read without claiming; real runs claim
/// from either ready status, then fall back to bounded reattempts.
async fn next_scene(
    store: &PostgresStore,
    args: &ProcessArgs,
) -> glacierwatch_core::Result<Option<Scene>> {
    if args.dry_run {
        return match &args.scene_id {
            Some(scene_id) => store.get_scene_by_id(scene_id).await,
            None => store.get_scene(SceneStatus::QueuedForProcessing).await,
        };
    }

    if let Some(scene) = store
        .claim(SceneStatus::QueuedForProcessing, SceneStatus::Processing)
        .await?
    {
        return Ok(Some(scene));
    }
    if let Some(scene) = store
        .claim(SceneStatus::Downloaded, SceneStatus::Processing)
        .await?
    {
        return Ok(Some(scene));
    }
    info!("No queued scenes, checking for reattempts");
    store
        .reattempt(Stage::Processing, Stage::Processing.default_max_attempts())
        .await
}

struct PipelineOutput {
    analysis: SceneAnalysis,
    records: Vec<GlacierSnowRecord>,
}

async fn analyze_scene(
    app: &AppConfig,
    store: &PostgresStore,
    scene: &Scene,
    dry_run: bool,
) -> glacierwatch_core::Result<()> {
    let project = store.get_project(&scene.project_id).await?.ok_or_else(|| {
        GlacierError::ProjectNotFound {
            project_id: scene.project_id.clone(),
        }
    })?;
    let config = ProjectConfig::load(&app.data_folder, &scene.project_id)?;
    let glaciers = store.glaciers_in_project(&scene.project_id).await?;

    let dem_file = paths::dem_path(&app.data_folder, &scene.project_id);
    if !dem_file.is_file() {
        return Err(GlacierError::ConfigMissing {
            key: dem_file.display().to_string(),
        });
    }
    let download_path = scene
        .download_path
        .clone()
        .map(PathBuf::from)
        .ok_or_else(|| GlacierError::ConfigInvalid {
            key: "download_path".to_string(),
            reason: format!("Scene {} has no downloaded bands", scene.scene_id),
        })?;

    info!(
        scene_id = %scene.scene_id,
        project = %project.name,
        glaciers = glaciers.len(),
        "Running snow analysis"
    );

    let result_dir = paths::prepare_folder(&paths::result_folder(
        &app.data_folder,
        &scene.project_id,
        &scene.scene_id,
    ))?;
    let temp_dir = paths::prepare_folder(&paths::temp_folder(&app.data_folder))?;

    let scene_id = scene.scene_id.clone();
    let result_dir_for_task = result_dir.clone();
    let temp_dir_for_task = temp_dir.clone();
    let output = tokio::task::spawn_blocking(move || {
        raster_pipeline(
            &scene_id,
            &config,
            &glaciers,
            &download_path,
            &dem_file,
            &result_dir_for_task,
            &temp_dir_for_task,
        )
    })
    .await
    .map_err(|e| GlacierError::Serialization(format!("Analysis task panicked: {e}")))
    .and_then(|r| r);
    let output = match output {
        Ok(output) => output,
        Err(e) => {
            let _ = paths::cleanup_folder(&temp_dir);
            return Err(e);
        }
    };

    if dry_run {
        write_dry_run_summary(&result_dir, &output)?;
        info!(
            scene_id = %scene.scene_id,
            total_snow_area_m2 = output.analysis.total_snow_area_m2,
            "Dry run complete, nothing persisted"
        );
    } else {
        store
            .commit_processed(
                scene,
                &result_dir.display().to_string(),
                &output.analysis,
                &output.records,
            )
            .await?;
    }

    paths::cleanup_folder(&temp_dir)?;
    Ok(())
}

/// The synchronous raster chain: clip bands to the glacier cover, write the
/// visual composite, compute NDSI and the snow mask, align the DEM, and run
/// the per-glacier statistics.
fn raster_pipeline(
    scene_id: &str,
    config: &ProjectConfig,
    glaciers: &[Glacier],
    download_path: &Path,
    dem_file: &Path,
    result_dir: &Path,
    temp_dir: &Path,
) -> glacierwatch_core::Result<PipelineOutput> {
    // Bands must all be present before any work starts.
    let mut band_files = Vec::new();
    for band in &config.bands {
        let file = paths::band_file(download_path, band);
        if !file.is_file() {
            return Err(GlacierError::ConfigMissing {
                key: file.display().to_string(),
            });
        }
        band_files.push((band.clone(), file));
    }
    let (_, template_file) = band_files
        .first()
        .ok_or_else(|| GlacierError::ConfigInvalid {
            key: "bands".to_string(),
            reason: "Project config lists no bands".to_string(),
        })?;

    // The scene grid decides which glaciers participate.
    let template = open_file(template_file)?;
    let (bounds, epsg) = {
        let t = template.transform();
        let (maxx, miny) = t.pixel_to_geo(template.width() as f64, template.height() as f64);
        (
            Bounds {
                minx: t.origin_x,
                miny,
                maxx,
                maxy: t.origin_y,
            },
            template.epsg(),
        )
    };
    drop(template);

    let included = included_glaciers(glaciers, &bounds, epsg)?;
    let Some(cover) = buffered_cover(&included, config.glacier_buffer) else {
        warn!(scene_id, "No glaciers fall within this scene, recording an empty analysis");
        return Ok(PipelineOutput {
            analysis: SceneAnalysis::new(scene_id),
            records: Vec::new(),
        });
    };

    // Clip every band to the buffered glacier cover.
    let mut clipped: Vec<(String, Raster)> = Vec::new();
    for (band, file) in &band_files {
        let out = temp_dir.join(format!("{band}.tif"));
        let reader = std::io::BufReader::new(fs::File::open(file)?);
        let label = file.display().to_string();
        let path = clip_to_aoi(reader, &label, &cover, epsg, &out, ClipParams::default())?
            .ok_or_else(|| GlacierError::InvalidGeometry {
                reason: format!("Band {band} holds no data over the glacier cover"),
            })?;
        clipped.push((band.clone(), open_file(&path)?.read_all()?));
    }

    let find_band = |prefix: &str| -> glacierwatch_core::Result<&Raster> {
        let name = config
            .band_key(prefix)
            .ok_or_else(|| GlacierError::MissingAsset {
                band: prefix.to_string(),
            })?;
        clipped
            .iter()
            .find(|(band, _)| band.as_str() == name)
            .map(|(_, raster)| raster)
            .ok_or_else(|| GlacierError::MissingAsset {
                band: prefix.to_string(),
            })
    };

    let red = find_band("B04")?;
    let green = find_band("B03")?;
    let blue = find_band("B02")?;
    write_geotiff_multiband(
        &result_dir.join("true_color.tif"),
        &[&red.data, &green.data, &blue.data],
        &green.transform,
        green.epsg,
        green.nodata,
    )?;
    info!(scene_id, "True color composite written");

    let swir = find_band("B11")?;
    let ndsi = compute_ndsi(green, swir)?;
    write_geotiff(&result_dir.join("ndsi.tif"), &ndsi)?;

    let mask = snow_mask(&ndsi, config.ndsi_threshold);
    write_geotiff(&result_dir.join("ndsi_mask.tif"), &mask)?;
    info!(scene_id, "Snow index and mask written");

    let dem = open_file(dem_file)?.read_all()?;
    let dem = reproject_match(&dem, &mask)?;

    let (analysis, records) = analyze_glaciers(scene_id, &included, &mask, &dem);
    Ok(PipelineOutput { analysis, records })
}

fn write_dry_run_summary(
    result_dir: &Path,
    output: &PipelineOutput,
) -> glacierwatch_core::Result<()> {
    let mut file = fs::File::create(result_dir.join("results.txt"))?;
    writeln!(
        file,
        "Total glacier snow area: {} m2",
        output.analysis.total_snow_area_m2
    )?;
    for record in &output.records {
        writeln!(
            file,
            "Glacier {}: Snow area: {} m2, Snowline elevation: {} m",
            record.glacier_id, record.snow_area_m2, record.snowline_elevation_m
        )?;
    }
    Ok(())
}
