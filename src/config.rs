use burn::config::Config;
use serde::{Deserialize, Serialize};

use crate::error::TrainError;
use crate::models::planning::PlanningPredictorConfig;
use crate::training::phase::LossWeights;

/// Validation metric used while the distributional phase is active.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMode {
    /// Teacher-forced MSE while pretraining, best-of-N destination + NLL afterwards.
    Intended,
    /// Teacher-forced MSE in every phase.
    PretrainOnly,
}

/// What the orchestrator does when a batch produces a NaN or infinite loss.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum NonFinitePolicy {
    Abort,
    SkipBatch,
}

#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "String::from(\"1\")")]
    pub name: String,

    #[config(default = 1)]
    pub pretrain_epochs: usize,

    #[config(default = 2)]
    pub train_epochs: usize,

    #[config(default = 64)]
    pub batch_size: usize,

    #[config(default = 1e-4)]
    pub learning_rate: f64,

    #[config(default = 20)]
    pub best_of_n: usize,

    #[config(default = 10.0)]
    pub grad_clip_norm: f32,

    #[config(default = 0.5)]
    pub destination_weight: f32,

    #[config(default = 3.0)]
    pub kl_weight: f32,

    /// Standard deviation of the latent prior sampled at evaluation time.
    #[config(default = 1.3)]
    pub latent_sigma: f32,

    #[config(default = 100)]
    pub report_interval: usize,

    #[config(default = 20)]
    pub eval_batches: usize,

    #[config(default = "ValidationMode::Intended")]
    pub validation: ValidationMode,

    #[config(default = "NonFinitePolicy::Abort")]
    pub non_finite: NonFinitePolicy,

    #[config(default = 42)]
    pub seed: u64,

    #[config(default = 8)]
    pub num_workers: usize,

    #[config(default = 39)]
    pub max_neighbors: usize,

    #[config(default = "PlanningPredictorConfig::new()")]
    pub model: PlanningPredictorConfig,
}

impl TrainingConfig {
    pub fn total_epochs(&self) -> usize {
        self.pretrain_epochs + self.train_epochs
    }

    pub fn loss_weights(&self) -> LossWeights {
        LossWeights {
            destination: self.destination_weight,
            kl: self.kl_weight,
        }
    }

    pub fn validate(&self) -> Result<(), TrainError> {
        let checks: [(bool, &str); 10] = [
            (self.total_epochs() > 0, "at least one epoch is required"),
            (self.batch_size > 0, "batch_size must be positive"),
            (self.learning_rate > 0.0, "learning_rate must be positive"),
            (self.best_of_n > 0, "best_of_n must be at least 1"),
            (
                self.grad_clip_norm.is_finite() && self.grad_clip_norm > 0.0,
                "grad_clip_norm must be a positive finite number",
            ),
            (self.latent_sigma > 0.0, "latent_sigma must be positive"),
            (self.report_interval > 0, "report_interval must be positive"),
            (self.max_neighbors > 0, "max_neighbors must be positive"),
            (
                self.model.history_len > 0 && self.model.horizon > 0,
                "history_len and horizon must be positive",
            ),
            (
                self.model.num_lateral > 0 && self.model.num_longitudinal > 0,
                "maneuver class counts must be positive",
            ),
        ];

        match checks.iter().find(|(ok, _)| !ok) {
            Some((_, reason)) => Err(TrainError::InvalidConfig(reason.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_schedule_and_weights() {
        let config = TrainingConfig::new();

        assert_eq!(config.pretrain_epochs, 1);
        assert_eq!(config.train_epochs, 2);
        assert_eq!(config.best_of_n, 20);
        assert_eq!(config.grad_clip_norm, 10.0);
        assert_eq!(config.loss_weights(), LossWeights { destination: 0.5, kl: 3.0 });
        assert_eq!(config.validation, ValidationMode::Intended);
        assert_eq!(config.non_finite, NonFinitePolicy::Abort);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unusable_settings() {
        assert!(TrainingConfig::new().with_best_of_n(0).validate().is_err());
        assert!(TrainingConfig::new().with_grad_clip_norm(0.0).validate().is_err());
        assert!(TrainingConfig::new()
            .with_pretrain_epochs(0)
            .with_train_epochs(0)
            .validate()
            .is_err());
    }
}
