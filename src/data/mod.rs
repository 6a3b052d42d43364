pub mod batch;
pub mod scene;

pub use batch::TrajectoryBatch;
pub use scene::{load_scenes, SceneBatcher, SceneItem, SceneLayout};
