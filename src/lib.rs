pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod losses;
pub mod models;
pub mod modules;
pub mod placement;
pub mod training;

pub use config::{NonFinitePolicy, TrainingConfig, ValidationMode};
pub use error::{LossError, TrainError};
