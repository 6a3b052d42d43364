pub mod planning;
pub mod predictor;

pub use predictor::{ForwardMode, PredictorOutput, SceneEncoding, TrajectoryPredictor};
