use burn::tensor::{backend::Backend, Tensor};

use crate::data::TrajectoryBatch;

/// How maneuver conditioning reaches the trajectory decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ForwardMode {
    /// The ground-truth maneuver labels of the batch are fed to the decoder.
    TeacherForced,
    /// The decoder is conditioned on the model's own maneuver predictions.
    Generative,
}

/// Scene context computed once and reused across destination candidates.
#[derive(Clone, Debug)]
pub struct SceneEncoding<B: Backend> {
    pub context: Tensor<B, 2>,      // [N, D]
    pub lateral: Tensor<B, 2>,      // [N, L] predicted class probabilities
    pub longitudinal: Tensor<B, 2>, // [N, M] predicted class probabilities
    pub conditioning: Tensor<B, 2>, // [N, L + M] maneuver input of the decoder
}

#[derive(Clone, Debug)]
pub struct PredictorOutput<B: Backend> {
    pub future: Tensor<B, 3>,       // [N, T, 5] mu_x, mu_y, sigma_x, sigma_y, rho
    pub lateral: Tensor<B, 2>,      // [N, L]
    pub longitudinal: Tensor<B, 2>, // [N, M]
    pub destination: Tensor<B, 2>,  // [N, 2] reconstructed destination
    pub mu: Tensor<B, 2>,           // [N, Z]
    pub logvar: Tensor<B, 2>,       // [N, Z]
}

/// The network driven by the training loop.
///
/// Latent noise is always supplied by the caller so runs stay reproducible
/// from a single seed.
pub trait TrajectoryPredictor<B: Backend> {
    fn latent_dim(&self) -> usize;

    fn encode(&self, batch: &TrajectoryBatch<B>, mode: ForwardMode) -> SceneEncoding<B>;

    /// Reconstructs `destination` through the latent posterior and decodes the
    /// future conditioned on the ground-truth destination. `noise` is `[N, Z]`.
    fn forward(
        &self,
        batch: &TrajectoryBatch<B>,
        destination: Tensor<B, 2>,
        noise: Tensor<B, 2>,
        mode: ForwardMode,
    ) -> PredictorOutput<B>;

    /// Draws one destination candidate from the prior, `noise` is `[N, Z]`.
    fn sample_destination(&self, encoding: &SceneEncoding<B>, noise: Tensor<B, 2>) -> Tensor<B, 2>;

    /// Decodes the full future for a given destination, `[N, T, 5]`.
    fn predict(&self, encoding: &SceneEncoding<B>, destination: Tensor<B, 2>) -> Tensor<B, 3>;
}
