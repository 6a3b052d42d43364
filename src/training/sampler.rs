use burn::tensor::{backend::Backend, Data, Shape, Tensor};
use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::placement::Placement;

/// Seeded source of Gaussian latent noise, drawn on the host and moved to the
/// run's device.
pub struct LatentSampler {
    rng: StdRng,
}

impl LatentSampler {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// `[rows, cols]` samples of `N(0, std^2)`.
    pub fn normal<B: Backend>(
        &mut self,
        rows: usize,
        cols: usize,
        std: f32,
        placement: &Placement<B>,
    ) -> Tensor<B, 2> {
        let values: Vec<f32> = (&mut self.rng)
            .sample_iter(StandardNormal)
            .take(rows * cols)
            .map(|v: f32| v * std)
            .collect();

        let data = Data::new(values, Shape::new([rows, cols]));
        Tensor::<B, 2>::from_data(data.convert()).to_device(placement.device())
    }
}
