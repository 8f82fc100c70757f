use async_trait::async_trait;
use glacierwatch_core::error::Result;
use glacierwatch_core::models::{
    Glacier, GlacierSnowRecord, Project, Scene, SceneAnalysis, SceneStatus, SceneTransition, Stage,
};

/// Port for the scene lifecycle work queue.
///
/// All status mutation flows through this trait. Implementations must make
/// `claim` and `reattempt` safe under an arbitrary number of concurrent
/// callers: a given scene is handed to exactly one of them.
#[async_trait]
pub trait SceneQueue: Send + Sync {
    /// Insert newly discovered scenes, ignoring ids already present.
    /// Returns how many rows were actually inserted.
    async fn add_scenes(&self, scenes: &[Scene]) -> Result<usize>;

    /// Newest scene currently in `status`, without claiming it.
    async fn get_scene(&self, status: SceneStatus) -> Result<Option<Scene>>;

    /// Fetch one scene by id.
    async fn get_scene_by_id(&self, scene_id: &str) -> Result<Option<Scene>>;

    /// Which of the given ids already exist in the store.
    async fn known_scene_ids(&self, scene_ids: &[String]) -> Result<Vec<String>>;

    /// Atomically take exactly one scene out of `from` and move it to `to`,
    /// newest acquisition first. Returns `None` when no unclaimed scene
    /// matches. The returned scene is held by the caller until it calls
    /// `commit`, `commit_processed`, or `fail`.
    async fn claim(&self, from: SceneStatus, to: SceneStatus) -> Result<Option<Scene>>;

    /// Move a held scene into a success status, writing the payload the
    /// transition carries. Rejects failure transitions.
    async fn commit(&self, scene: &Scene, transition: SceneTransition) -> Result<()>;

    /// Persist a scene's analysis rows and its `processed` transition in
    /// one transaction.
    async fn commit_processed(
        &self,
        scene: &Scene,
        result_path: &str,
        analysis: &SceneAnalysis,
        records: &[GlacierSnowRecord],
    ) -> Result<()>;

    /// Move a held scene into its stage's failure status, recording the
    /// error and incrementing that stage's attempts counter once.
    async fn fail(&self, scene: &Scene, transition: SceneTransition) -> Result<()>;

    /// Take one failed scene of `stage` whose attempts are below
    /// `max_attempts` and move it back into the in-progress status, oldest
    /// acquisition first. Returns `None` when nothing is eligible.
    async fn reattempt(&self, stage: Stage, max_attempts: i32) -> Result<Option<Scene>>;
}

/// Port for project and glacier lookups.
#[async_trait]
pub trait ProjectStore: Send + Sync {
    /// Fetch a project by id.
    async fn get_project(&self, project_id: &str) -> Result<Option<Project>>;

    /// Glaciers registered to a project.
    async fn glaciers_in_project(&self, project_id: &str) -> Result<Vec<Glacier>>;
}
