//! SceneQueue implementation for PostgreSQL.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use glacierwatch_core::error::{GlacierError, Result};
use glacierwatch_core::models::{
    GlacierSnowRecord, Scene, SceneAnalysis, SceneStatus, SceneTransition, Stage,
};
use sqlx::postgres::PgRow;
use sqlx::Row;
use tracing::info;

use super::PostgresStore;
use crate::ports::SceneQueue;

const SCENE_COLUMNS: &str = "scene_id, project_id, assets, acquisition_date, status, \
     download_path, result_path, attempts_download, attempts_processing, \
     last_error, created_at, updated_at";

fn scene_from_row(row: &PgRow) -> Result<Scene> {
    let status: String = row
        .try_get("status")
        .map_err(|e| GlacierError::Database(e.to_string()))?;
    let assets: serde_json::Value = row
        .try_get("assets")
        .map_err(|e| GlacierError::Database(e.to_string()))?;
    let assets = serde_json::from_value(assets)
        .map_err(|e| GlacierError::Serialization(format!("Bad assets map: {e}")))?;

    let get_text = |name: &str| -> Result<Option<String>> {
        row.try_get(name)
            .map_err(|e| GlacierError::Database(e.to_string()))
    };
    let get_time = |name: &str| -> Result<DateTime<Utc>> {
        row.try_get(name)
            .map_err(|e| GlacierError::Database(e.to_string()))
    };
    let get_i32 = |name: &str| -> Result<i32> {
        row.try_get(name)
            .map_err(|e| GlacierError::Database(e.to_string()))
    };

    Ok(Scene {
        scene_id: row
            .try_get("scene_id")
            .map_err(|e| GlacierError::Database(e.to_string()))?,
        project_id: row
            .try_get("project_id")
            .map_err(|e| GlacierError::Database(e.to_string()))?,
        assets,
        acquisition_date: get_time("acquisition_date")?,
        status: status.parse()?,
        download_path: get_text("download_path")?,
        result_path: get_text("result_path")?,
        attempts_download: get_i32("attempts_download")?,
        attempts_processing: get_i32("attempts_processing")?,
        last_error: get_text("last_error")?,
        created_at: get_time("created_at")?,
        updated_at: get_time("updated_at")?,
    })
}

#[async_trait]
impl SceneQueue for PostgresStore {
    async fn add_scenes(&self, scenes: &[Scene]) -> Result<usize> {
        let mut inserted = 0;
        for scene in scenes {
            let assets = serde_json::to_value(&scene.assets)
                .map_err(|e| GlacierError::Serialization(e.to_string()))?;
            let result = sqlx::query(
                r#"
                INSERT INTO scenes (scene_id, project_id, assets, acquisition_date, status)
                VALUES ($1, $2, $3, $4, $5)
                ON CONFLICT (scene_id) DO NOTHING
                "#,
            )
            .bind(&scene.scene_id)
            .bind(&scene.project_id)
            .bind(assets)
            .bind(scene.acquisition_date)
            .bind(scene.status.as_str())
            .execute(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to insert scene: {e}")))?;
            inserted += result.rows_affected() as usize;
        }
        Ok(inserted)
    }

    async fn get_scene(&self, status: SceneStatus) -> Result<Option<Scene>> {
        let sql = format!(
            "SELECT {SCENE_COLUMNS} FROM scenes WHERE status = $1 \
             ORDER BY acquisition_date DESC LIMIT 1"
        );
        let row = sqlx::query(&sql)
            .bind(status.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to fetch scene: {e}")))?;
        row.as_ref().map(scene_from_row).transpose()
    }

    async fn get_scene_by_id(&self, scene_id: &str) -> Result<Option<Scene>> {
        let sql = format!("SELECT {SCENE_COLUMNS} FROM scenes WHERE scene_id = $1");
        let row = sqlx::query(&sql)
            .bind(scene_id)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to fetch scene: {e}")))?;
        row.as_ref().map(scene_from_row).transpose()
    }

    async fn known_scene_ids(&self, scene_ids: &[String]) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT scene_id FROM scenes WHERE scene_id = ANY($1)")
            .bind(scene_ids)
            .fetch_all(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to fetch scene ids: {e}")))?;
        rows.iter()
            .map(|row| {
                row.try_get("scene_id")
                    .map_err(|e| GlacierError::Database(e.to_string()))
            })
            .collect()
    }

    async fn claim(&self, from: SceneStatus, to: SceneStatus) -> Result<Option<Scene>> {
        if !from.can_transition(to) {
            return Err(GlacierError::InvalidTransition { from, to });
        }

        // Lock, transition, and return in one statement: concurrent callers
        // skip rows another transaction holds, so the top unlocked candidate
        // goes to exactly one of them.
        let sql = format!(
            r#"
            UPDATE scenes SET status = $2, updated_at = NOW()
            WHERE scene_id = (
                SELECT scene_id FROM scenes
                WHERE status = $1
                ORDER BY acquisition_date DESC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SCENE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(from.as_str())
            .bind(to.as_str())
            .fetch_optional(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Claim failed: {e}")))?;

        let scene = row.as_ref().map(scene_from_row).transpose()?;
        if let Some(scene) = &scene {
            info!(scene_id = %scene.scene_id, from = %from, to = %to, "Claimed scene");
        }
        Ok(scene)
    }

    async fn commit(&self, scene: &Scene, transition: SceneTransition) -> Result<()> {
        let target = transition.target_status();
        let path = match &transition {
            SceneTransition::ReadyForProcessing { download_path } => {
                ("download_path", download_path.display().to_string())
            }
            SceneTransition::Processed { result_path } => {
                ("result_path", result_path.display().to_string())
            }
            _ => {
                return Err(GlacierError::InvalidTransition {
                    from: scene.status,
                    to: target,
                })
            }
        };

        let sql = format!(
            "UPDATE scenes SET status = $2, {} = $3, updated_at = NOW() WHERE scene_id = $1",
            path.0
        );
        sqlx::query(&sql)
            .bind(&scene.scene_id)
            .bind(target.as_str())
            .bind(&path.1)
            .execute(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Commit failed: {e}")))?;
        info!(scene_id = %scene.scene_id, status = %target, "Scene committed");
        Ok(())
    }

    async fn commit_processed(
        &self,
        scene: &Scene,
        result_path: &str,
        analysis: &SceneAnalysis,
        records: &[GlacierSnowRecord],
    ) -> Result<()> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to begin transaction: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO scene_analyses (id, scene_id, analysis_date, total_snow_area_m2)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(analysis.id)
        .bind(&analysis.scene_id)
        .bind(analysis.analysis_date)
        .bind(analysis.total_snow_area_m2)
        .execute(&mut *tx)
        .await
        .map_err(|e| GlacierError::Database(format!("Failed to insert analysis: {e}")))?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO glacier_snow_records
                    (id, analysis_id, glacier_id, scene_id, snow_area_m2,
                     snowline_elevation_m, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(record.id)
            .bind(record.analysis_id)
            .bind(&record.glacier_id)
            .bind(&record.scene_id)
            .bind(record.snow_area_m2)
            .bind(record.snowline_elevation_m)
            .bind(record.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to insert snow record: {e}")))?;
        }

        sqlx::query(
            "UPDATE scenes SET status = $2, result_path = $3, updated_at = NOW() \
             WHERE scene_id = $1",
        )
        .bind(&scene.scene_id)
        .bind(SceneStatus::Processed.as_str())
        .bind(result_path)
        .execute(&mut *tx)
        .await
        .map_err(|e| GlacierError::Database(format!("Failed to update scene: {e}")))?;

        tx.commit()
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to commit transaction: {e}")))?;

        info!(
            scene_id = %scene.scene_id,
            glaciers = records.len(),
            "Scene processed and analysis persisted"
        );
        Ok(())
    }

    async fn fail(&self, scene: &Scene, transition: SceneTransition) -> Result<()> {
        let stage = transition
            .failed_stage()
            .ok_or(GlacierError::InvalidTransition {
                from: scene.status,
                to: transition.target_status(),
            })?;
        let error = match &transition {
            SceneTransition::FailedDownload { error }
            | SceneTransition::FailedProcessing { error } => error.as_str(),
            _ => unreachable!("failed_stage filtered success transitions"),
        };

        let attempts_column = match stage {
            Stage::Download => "attempts_download",
            Stage::Processing => "attempts_processing",
        };
        let sql = format!(
            "UPDATE scenes SET status = $2, last_error = $3, \
             {attempts_column} = {attempts_column} + 1, updated_at = NOW() \
             WHERE scene_id = $1"
        );
        sqlx::query(&sql)
            .bind(&scene.scene_id)
            .bind(transition.target_status().as_str())
            .bind(error)
            .execute(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Fail transition failed: {e}")))?;
        info!(
            scene_id = %scene.scene_id,
            status = %transition.target_status(),
            error,
            "Scene marked failed"
        );
        Ok(())
    }

    async fn reattempt(&self, stage: Stage, max_attempts: i32) -> Result<Option<Scene>> {
        let attempts_column = match stage {
            Stage::Download => "attempts_download",
            Stage::Processing => "attempts_processing",
        };

        // Oldest failures first, so older retries are not starved by a
        // stream of fresh failures.
        let sql = format!(
            r#"
            UPDATE scenes SET status = $2, updated_at = NOW()
            WHERE scene_id = (
                SELECT scene_id FROM scenes
                WHERE status = $1 AND {attempts_column} < $3
                ORDER BY acquisition_date ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {SCENE_COLUMNS}
            "#
        );
        let row = sqlx::query(&sql)
            .bind(stage.failed_status().as_str())
            .bind(stage.in_progress_status().as_str())
            .bind(max_attempts)
            .fetch_optional(self.pool())
            .await
            .map_err(|e| GlacierError::Database(format!("Reattempt failed: {e}")))?;

        let scene = row.as_ref().map(scene_from_row).transpose()?;
        if let Some(scene) = &scene {
            info!(
                scene_id = %scene.scene_id,
                attempts = scene.attempts(stage),
                "Reattempting failed scene"
            );
        }
        Ok(scene)
    }
}
