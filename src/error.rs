use thiserror::Error;

/// Failures raised by the masked loss functions before any arithmetic happens.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LossError {
    #[error("{op}: shape mismatch, expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        op: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("{op}: validity mask sums to zero, batch has nothing to score")]
    DegenerateBatch { op: &'static str },
}

#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Loss(#[from] LossError),

    #[error("non-finite loss {value} at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize, value: f32 },

    #[error("failed to write checkpoint {path}: {reason}")]
    Checkpoint { path: String, reason: String },

    #[error("dataset error: {0}")]
    Dataset(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("metrics: {0}")]
    Metrics(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl TrainError {
    /// Degenerate batches are skipped by the orchestrator, everything else ends the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, TrainError::Loss(LossError::DegenerateBatch { .. }))
    }
}
