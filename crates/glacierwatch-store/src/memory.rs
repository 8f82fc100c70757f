//! In-memory store implementation for development and testing.
//!
//! The scene map sits behind a single `Mutex`, which serializes claims the
//! way row-level locking does in PostgreSQL; the observable queue semantics
//! (exactly-one-claimer, ordering, attempt bounds) are identical. Lock
//! `unwrap()` is intentional: poisoning only happens after another thread
//! panicked while holding the lock, which is unrecoverable anyway.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use glacierwatch_core::error::{GlacierError, Result};
use glacierwatch_core::models::{
    Glacier, GlacierSnowRecord, Project, Scene, SceneAnalysis, SceneStatus, SceneTransition, Stage,
};

use crate::ports::{ProjectStore, SceneQueue};

/// In-memory implementation of [`SceneQueue`] and [`ProjectStore`].
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    scenes: Arc<Mutex<HashMap<String, Scene>>>,
    projects: Arc<Mutex<HashMap<String, Project>>>,
    glaciers: Arc<Mutex<HashMap<String, Vec<Glacier>>>>,
    analyses: Arc<Mutex<Vec<SceneAnalysis>>>,
    records: Arc<Mutex<Vec<GlacierSnowRecord>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a project.
    pub fn insert_project(&self, project: Project) {
        self.projects
            .lock()
            .unwrap()
            .insert(project.project_id.clone(), project);
    }

    /// Seed glaciers for a project.
    pub fn insert_glaciers(&self, project_id: &str, glaciers: Vec<Glacier>) {
        self.glaciers
            .lock()
            .unwrap()
            .entry(project_id.to_string())
            .or_default()
            .extend(glaciers);
    }

    /// Persisted analyses, for inspection in tests.
    pub fn analyses(&self) -> Vec<SceneAnalysis> {
        self.analyses.lock().unwrap().clone()
    }

    /// Persisted glacier snow rows, for inspection in tests.
    pub fn snow_records(&self) -> Vec<GlacierSnowRecord> {
        self.records.lock().unwrap().clone()
    }

    fn apply_success(scene: &mut Scene, transition: &SceneTransition) -> Result<()> {
        let target = transition.target_status();
        if !scene.status.can_transition(target) {
            return Err(GlacierError::InvalidTransition {
                from: scene.status,
                to: target,
            });
        }
        match transition {
            SceneTransition::ReadyForProcessing { download_path } => {
                scene.download_path = Some(download_path.display().to_string());
            }
            SceneTransition::Processed { result_path } => {
                scene.result_path = Some(result_path.display().to_string());
            }
            _ => unreachable!("caller filtered failure transitions"),
        }
        scene.status = target;
        scene.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SceneQueue for MemoryStore {
    async fn add_scenes(&self, scenes: &[Scene]) -> Result<usize> {
        let mut map = self.scenes.lock().unwrap();
        let mut inserted = 0;
        for scene in scenes {
            if !map.contains_key(&scene.scene_id) {
                map.insert(scene.scene_id.clone(), scene.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn get_scene(&self, status: SceneStatus) -> Result<Option<Scene>> {
        let map = self.scenes.lock().unwrap();
        Ok(map
            .values()
            .filter(|s| s.status == status)
            .max_by_key(|s| s.acquisition_date)
            .cloned())
    }

    async fn get_scene_by_id(&self, scene_id: &str) -> Result<Option<Scene>> {
        Ok(self.scenes.lock().unwrap().get(scene_id).cloned())
    }

    async fn known_scene_ids(&self, scene_ids: &[String]) -> Result<Vec<String>> {
        let map = self.scenes.lock().unwrap();
        Ok(scene_ids
            .iter()
            .filter(|id| map.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn claim(&self, from: SceneStatus, to: SceneStatus) -> Result<Option<Scene>> {
        if !from.can_transition(to) {
            return Err(GlacierError::InvalidTransition { from, to });
        }

        let mut map = self.scenes.lock().unwrap();
        let candidate = map
            .values()
            .filter(|s| s.status == from)
            .max_by_key(|s| s.acquisition_date)
            .map(|s| s.scene_id.clone());

        let Some(scene_id) = candidate else {
            return Ok(None);
        };

        let scene = map.get_mut(&scene_id).expect("candidate id exists");
        scene.status = to;
        scene.updated_at = Utc::now();
        Ok(Some(scene.clone()))
    }

    async fn commit(&self, scene: &Scene, transition: SceneTransition) -> Result<()> {
        if transition.failed_stage().is_some() {
            return Err(GlacierError::InvalidTransition {
                from: scene.status,
                to: transition.target_status(),
            });
        }
        let mut map = self.scenes.lock().unwrap();
        let stored = map
            .get_mut(&scene.scene_id)
            .ok_or_else(|| GlacierError::SceneNotFound {
                scene_id: scene.scene_id.clone(),
            })?;
        Self::apply_success(stored, &transition)
    }

    async fn commit_processed(
        &self,
        scene: &Scene,
        result_path: &str,
        analysis: &SceneAnalysis,
        records: &[GlacierSnowRecord],
    ) -> Result<()> {
        let mut map = self.scenes.lock().unwrap();
        let stored = map
            .get_mut(&scene.scene_id)
            .ok_or_else(|| GlacierError::SceneNotFound {
                scene_id: scene.scene_id.clone(),
            })?;
        Self::apply_success(
            stored,
            &SceneTransition::Processed {
                result_path: result_path.into(),
            },
        )?;
        self.analyses.lock().unwrap().push(analysis.clone());
        self.records.lock().unwrap().extend(records.iter().cloned());
        Ok(())
    }

    async fn fail(&self, scene: &Scene, transition: SceneTransition) -> Result<()> {
        let stage = transition
            .failed_stage()
            .ok_or(GlacierError::InvalidTransition {
                from: scene.status,
                to: transition.target_status(),
            })?;

        let mut map = self.scenes.lock().unwrap();
        let stored = map
            .get_mut(&scene.scene_id)
            .ok_or_else(|| GlacierError::SceneNotFound {
                scene_id: scene.scene_id.clone(),
            })?;

        let target = transition.target_status();
        if !stored.status.can_transition(target) {
            return Err(GlacierError::InvalidTransition {
                from: stored.status,
                to: target,
            });
        }

        let error = match &transition {
            SceneTransition::FailedDownload { error }
            | SceneTransition::FailedProcessing { error } => error.clone(),
            _ => unreachable!("failed_stage filtered success transitions"),
        };

        match stage {
            Stage::Download => stored.attempts_download += 1,
            Stage::Processing => stored.attempts_processing += 1,
        }
        stored.last_error = Some(error);
        stored.status = target;
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn reattempt(&self, stage: Stage, max_attempts: i32) -> Result<Option<Scene>> {
        let failed = stage.failed_status();
        let in_progress = stage.in_progress_status();

        let mut map = self.scenes.lock().unwrap();
        let candidate = map
            .values()
            .filter(|s| s.status == failed && s.attempts(stage) < max_attempts)
            .min_by_key(|s| s.acquisition_date)
            .map(|s| s.scene_id.clone());

        let Some(scene_id) = candidate else {
            return Ok(None);
        };

        let scene = map.get_mut(&scene_id).expect("candidate id exists");
        scene.status = in_progress;
        scene.updated_at = Utc::now();
        Ok(Some(scene.clone()))
    }
}

#[async_trait]
impl ProjectStore for MemoryStore {
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>> {
        Ok(self.projects.lock().unwrap().get(project_id).cloned())
    }

    async fn glaciers_in_project(&self, project_id: &str) -> Result<Vec<Glacier>> {
        Ok(self
            .glaciers
            .lock()
            .unwrap()
            .get(project_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use std::collections::HashSet;

    fn scene(id: &str, age_hours: i64) -> Scene {
        let mut scene = Scene::discovered(
            id,
            "svalbard",
            HashMap::from([("B03".to_string(), "https://assets.example/b03".to_string())]),
            Utc::now() - Duration::hours(age_hours),
        );
        scene.status = SceneStatus::QueuedForDownload;
        scene
    }

    #[tokio::test]
    async fn claim_hands_each_scene_to_exactly_one_caller() {
        let store = MemoryStore::new();
        let scenes: Vec<Scene> = (0..20).map(|i| scene(&format!("s{i}"), i)).collect();
        store.add_scenes(&scenes).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut claimed = Vec::new();
                while let Some(scene) = store
                    .claim(SceneStatus::QueuedForDownload, SceneStatus::Downloading)
                    .await
                    .unwrap()
                {
                    claimed.push(scene.scene_id);
                }
                claimed
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        let unique: HashSet<&String> = all.iter().collect();
        assert_eq!(all.len(), 20, "every scene claimed exactly once");
        assert_eq!(unique.len(), 20, "no scene handed to two callers");
    }

    #[tokio::test]
    async fn claim_prefers_newest_acquisition() {
        let store = MemoryStore::new();
        store
            .add_scenes(&[scene("old", 48), scene("new", 1), scene("mid", 24)])
            .await
            .unwrap();

        let claimed = store
            .claim(SceneStatus::QueuedForDownload, SceneStatus::Downloading)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(claimed.scene_id, "new");
        assert_eq!(claimed.status, SceneStatus::Downloading);
    }

    #[tokio::test]
    async fn claim_rejects_off_graph_edges() {
        let store = MemoryStore::new();
        let err = store
            .claim(SceneStatus::Discovered, SceneStatus::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, GlacierError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn commit_ready_records_download_path() {
        let store = MemoryStore::new();
        store.add_scenes(&[scene("s1", 1)]).await.unwrap();
        let held = store
            .claim(SceneStatus::QueuedForDownload, SceneStatus::Downloading)
            .await
            .unwrap()
            .unwrap();

        store
            .commit(
                &held,
                SceneTransition::ReadyForProcessing {
                    download_path: "data/raw/svalbard/s1".into(),
                },
            )
            .await
            .unwrap();

        let stored = store.get_scene_by_id("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SceneStatus::QueuedForProcessing);
        assert_eq!(stored.download_path.as_deref(), Some("data/raw/svalbard/s1"));
    }

    #[tokio::test]
    async fn commit_rejects_failure_transitions() {
        let store = MemoryStore::new();
        store.add_scenes(&[scene("s1", 1)]).await.unwrap();
        let held = store
            .claim(SceneStatus::QueuedForDownload, SceneStatus::Downloading)
            .await
            .unwrap()
            .unwrap();

        let err = store
            .fail(
                &held,
                SceneTransition::ReadyForProcessing {
                    download_path: "x".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GlacierError::InvalidTransition { .. }));

        let err = store
            .commit(
                &held,
                SceneTransition::FailedDownload {
                    error: "boom".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, GlacierError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn fail_and_reattempt_round_increments_attempts() {
        let store = MemoryStore::new();
        store.add_scenes(&[scene("s1", 1)]).await.unwrap();

        for expected_attempts in 1..=2 {
            let held = match expected_attempts {
                1 => store
                    .claim(SceneStatus::QueuedForDownload, SceneStatus::Downloading)
                    .await
                    .unwrap()
                    .unwrap(),
                _ => store.reattempt(Stage::Download, 5).await.unwrap().unwrap(),
            };
            store
                .fail(
                    &held,
                    SceneTransition::FailedDownload {
                        error: "connection reset".into(),
                    },
                )
                .await
                .unwrap();
            let stored = store.get_scene_by_id("s1").await.unwrap().unwrap();
            assert_eq!(stored.attempts_download, expected_attempts);
            assert_eq!(stored.status, SceneStatus::FailedDownload);
            assert_eq!(stored.last_error.as_deref(), Some("connection reset"));
        }
    }

    #[tokio::test]
    async fn reattempt_never_returns_exhausted_scenes() {
        let store = MemoryStore::new();
        let mut exhausted = scene("worn", 1);
        exhausted.status = SceneStatus::FailedDownload;
        exhausted.attempts_download = 5;
        store.add_scenes(&[exhausted]).await.unwrap();

        assert!(store
            .reattempt(Stage::Download, 5)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn reattempt_prefers_oldest_failure() {
        let store = MemoryStore::new();
        let mut older = scene("older", 72);
        older.status = SceneStatus::FailedProcessing;
        older.attempts_processing = 1;
        let mut newer = scene("newer", 2);
        newer.status = SceneStatus::FailedProcessing;
        newer.attempts_processing = 1;
        store.add_scenes(&[older, newer]).await.unwrap();

        let retried = store
            .reattempt(Stage::Processing, 3)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(retried.scene_id, "older");
        assert_eq!(retried.status, SceneStatus::Processing);
    }

    #[tokio::test]
    async fn commit_processed_persists_rows_and_status_together() {
        let store = MemoryStore::new();
        let mut ready = scene("s1", 1);
        ready.status = SceneStatus::QueuedForProcessing;
        ready.download_path = Some("data/raw/svalbard/s1".into());
        store.add_scenes(&[ready]).await.unwrap();

        let held = store
            .claim(SceneStatus::QueuedForProcessing, SceneStatus::Processing)
            .await
            .unwrap()
            .unwrap();

        let mut analysis = SceneAnalysis::new("s1");
        analysis.total_snow_area_m2 = 1200.0;
        let record =
            GlacierSnowRecord::new(analysis.id, "glacier-1", "s1", 1200.0, 940.0);

        store
            .commit_processed(&held, "data/result/svalbard/s1", &analysis, &[record])
            .await
            .unwrap();

        let stored = store.get_scene_by_id("s1").await.unwrap().unwrap();
        assert_eq!(stored.status, SceneStatus::Processed);
        assert_eq!(
            stored.result_path.as_deref(),
            Some("data/result/svalbard/s1")
        );
        assert_eq!(store.analyses().len(), 1);
        assert_eq!(store.snow_records().len(), 1);
    }

    #[tokio::test]
    async fn add_scenes_ignores_duplicates() {
        let store = MemoryStore::new();
        assert_eq!(store.add_scenes(&[scene("s1", 1)]).await.unwrap(), 1);
        assert_eq!(
            store
                .add_scenes(&[scene("s1", 1), scene("s2", 2)])
                .await
                .unwrap(),
            1
        );
    }
}
