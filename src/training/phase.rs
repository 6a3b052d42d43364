use burn::tensor::{backend::Backend, Tensor};
use serde::{Deserialize, Serialize};

use crate::data::TrajectoryBatch;
use crate::error::LossError;
use crate::losses::{kl_divergence, masked_dest_mse, masked_mse, masked_nll};
use crate::models::PredictorOutput;

/// Curriculum stage. Selected once per epoch from the epoch index alone.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Deterministic regression warm-up, trajectory scored with masked MSE.
    Pretrain,
    /// Trajectory scored with the bivariate Gaussian NLL.
    Distributional,
}

impl Phase {
    pub fn for_epoch(epoch: usize, pretrain_epochs: usize) -> Self {
        if epoch >= pretrain_epochs {
            Phase::Distributional
        } else {
            Phase::Pretrain
        }
    }

    /// Name of the trajectory metric reported for this phase.
    pub fn metric_name(&self) -> &'static str {
        match self {
            Phase::Pretrain => "RMSE",
            Phase::Distributional => "NLL",
        }
    }

    pub fn trajectory_loss<B: Backend>(
        &self,
        future_pred: Tensor<B, 3>,
        future: Tensor<B, 3>,
        future_mask: Tensor<B, 3>,
    ) -> Result<Tensor<B, 1>, LossError> {
        match self {
            Phase::Pretrain => masked_mse(future_pred, future, future_mask),
            Phase::Distributional => masked_nll(future_pred, future, future_mask),
        }
    }

    /// Individual loss terms of one forward pass under this phase.
    pub fn loss_terms<B: Backend>(
        &self,
        output: PredictorOutput<B>,
        batch: &TrajectoryBatch<B>,
    ) -> Result<LossTerms<B>, LossError> {
        let trajectory = self.trajectory_loss(
            output.future,
            batch.future.clone(),
            batch.future_mask.clone(),
        )?;
        let destination = masked_dest_mse(
            output.destination,
            batch.destination.clone(),
            batch.destination_mask.clone(),
        )?;
        let kl = kl_divergence(output.mu, output.logvar)?;

        Ok(LossTerms {
            trajectory,
            destination,
            kl,
        })
    }

    /// The loss optimized during an epoch of this phase.
    pub fn training_loss<B: Backend>(
        &self,
        output: PredictorOutput<B>,
        batch: &TrajectoryBatch<B>,
        weights: LossWeights,
    ) -> Result<Tensor<B, 1>, LossError> {
        Ok(self.loss_terms(output, batch)?.total(weights))
    }
}

/// Weights of the destination reconstruction and KL terms.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
pub struct LossWeights {
    pub destination: f32,
    pub kl: f32,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            destination: 0.5,
            kl: 3.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LossTerms<B: Backend> {
    pub trajectory: Tensor<B, 1>,
    pub destination: Tensor<B, 1>,
    pub kl: Tensor<B, 1>,
}

impl<B: Backend> LossTerms<B> {
    pub fn total(self, weights: LossWeights) -> Tensor<B, 1> {
        self.trajectory + self.destination * weights.destination + self.kl * weights.kl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::ElementConversion;

    type TestBackend = NdArray<f32>;

    fn value(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_scalar().elem()
    }

    fn batch() -> TrajectoryBatch<TestBackend> {
        TrajectoryBatch {
            history: Tensor::zeros([1, 2, 2]),
            neighbors: Tensor::zeros([1, 1, 2, 2]),
            neighbor_mask: Tensor::zeros([1, 1]),
            plan: Tensor::zeros([1, 2, 2]),
            plan_mask: Tensor::zeros([1, 2, 2]),
            future: Tensor::from_floats([[[1.0, 0.0], [2.0, 0.0]]]),
            future_mask: Tensor::ones([1, 2, 2]),
            lateral: Tensor::from_floats([[1.0, 0.0, 0.0]]),
            longitudinal: Tensor::from_floats([[1.0, 0.0]]),
            destination: Tensor::from_floats([[2.0, 0.0]]),
            destination_mask: Tensor::ones([1, 2]),
        }
    }

    fn output() -> PredictorOutput<TestBackend> {
        PredictorOutput {
            future: Tensor::from_floats([[[1.0, 1.0, 1.0, 1.0, 0.0], [2.0, 0.0, 2.0, 1.0, 0.5]]]),
            lateral: Tensor::from_floats([[0.5, 0.25, 0.25]]),
            longitudinal: Tensor::from_floats([[0.5, 0.5]]),
            destination: Tensor::from_floats([[3.0, 0.0]]),
            mu: Tensor::from_floats([[1.0, 0.0]]),
            logvar: Tensor::zeros([1, 2]),
        }
    }

    #[test]
    fn switches_exactly_at_the_pretrain_boundary() {
        let phases: Vec<Phase> = (0..3).map(|epoch| Phase::for_epoch(epoch, 1)).collect();

        assert_eq!(
            phases,
            vec![Phase::Pretrain, Phase::Distributional, Phase::Distributional]
        );
        assert_eq!(Phase::for_epoch(0, 0), Phase::Distributional);
    }

    #[test]
    fn pretrain_loss_is_mse_plus_weighted_destination_and_kl() {
        let out = output();
        let mse = value(
            masked_mse(out.future.clone(), batch().future, batch().future_mask).unwrap(),
        );
        let dest = value(
            masked_dest_mse(out.destination.clone(), batch().destination, batch().destination_mask)
                .unwrap(),
        );
        let kl = value(kl_divergence(out.mu.clone(), out.logvar.clone()).unwrap());

        let loss = value(
            Phase::Pretrain
                .training_loss(out, &batch(), LossWeights::default())
                .unwrap(),
        );

        assert!((loss - (mse + 0.5 * dest + 3.0 * kl)).abs() < 1e-5);
    }

    #[test]
    fn distributional_loss_scores_the_trajectory_with_nll() {
        let out = output();
        let nll = value(masked_nll(out.future.clone(), batch().future, batch().future_mask).unwrap());

        let terms = Phase::Distributional.loss_terms(out, &batch()).unwrap();

        assert!((value(terms.trajectory) - nll).abs() < 1e-6);
        assert_eq!(Phase::Distributional.metric_name(), "NLL");
        assert_eq!(Phase::Pretrain.metric_name(), "RMSE");
    }
}
