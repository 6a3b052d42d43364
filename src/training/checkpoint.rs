use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;

use crate::error::TrainError;

/// Where a run's checkpoints go and what they are called.
#[derive(Clone, Debug)]
pub struct CheckpointPlan {
    dir: PathBuf,
    run_name: String,
}

impl CheckpointPlan {
    pub fn new<P: Into<PathBuf>>(dir: P, run_name: &str) -> Self {
        Self {
            dir: dir.into(),
            run_name: run_name.to_string(),
        }
    }

    /// Checkpoint written once `epochs_done` epochs have completed.
    pub fn epoch_path(&self, epochs_done: usize) -> PathBuf {
        self.dir
            .join(format!("{}-pre{}-nll{}.tar", self.run_name, epochs_done, 0))
    }

    /// Checkpoint written after the last epoch.
    pub fn final_path(&self) -> PathBuf {
        self.dir.join(format!("{}.tar", self.run_name))
    }
}

pub trait CheckpointSink<B: Backend, M: Module<B>> {
    fn save(&mut self, model: &M, path: &Path) -> Result<(), TrainError>;
}

/// Writes the full parameter record with burn's binary file recorder. The
/// recorder replaces the `.tar` extension with its own.
#[derive(Default)]
pub struct RecorderSink {
    recorder: BinFileRecorder<FullPrecisionSettings>,
}

impl RecorderSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<B: Backend, M: Module<B>> CheckpointSink<B, M> for RecorderSink {
    fn save(&mut self, model: &M, path: &Path) -> Result<(), TrainError> {
        model
            .clone()
            .save_file(path.to_path_buf(), &self.recorder)
            .map_err(|err| TrainError::Checkpoint {
                path: path.display().to_string(),
                reason: format!("{err:?}"),
            })
    }
}

/// Remembers requested checkpoint paths without touching the filesystem.
#[derive(Debug, Default, Clone)]
pub struct DryRunSink {
    pub saved: Vec<PathBuf>,
}

impl<B: Backend, M: Module<B>> CheckpointSink<B, M> for DryRunSink {
    fn save(&mut self, _model: &M, path: &Path) -> Result<(), TrainError> {
        self.saved.push(path.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_run_convention() {
        let plan = CheckpointPlan::new("trained_models/run", "run");

        assert_eq!(
            plan.epoch_path(3),
            PathBuf::from("trained_models/run/run-pre3-nll0.tar")
        );
        assert_eq!(plan.final_path(), PathBuf::from("trained_models/run/run.tar"));
    }
}
