pub mod analysis;
pub mod project;
pub mod scene;

pub use analysis::{GlacierSnowRecord, SceneAnalysis};
pub use project::{Glacier, Project};
pub use scene::{Scene, SceneStatus, SceneTransition, Stage};
