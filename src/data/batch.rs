use burn::tensor::{backend::Backend, Tensor};

#[derive(Clone, Debug)]
pub struct TrajectoryBatch<B: Backend> {
    pub history: Tensor<B, 3>,          // [N, Th, 2]
    pub neighbors: Tensor<B, 4>,        // [N, K, Th, 2]
    pub neighbor_mask: Tensor<B, 2>,    // [N, K]
    pub plan: Tensor<B, 3>,             // [N, Tf, 2]
    pub plan_mask: Tensor<B, 3>,        // [N, Tf, 2]
    pub future: Tensor<B, 3>,           // [N, Tf, 2]
    pub future_mask: Tensor<B, 3>,      // [N, Tf, 2]
    pub lateral: Tensor<B, 2>,          // [N, L] one-hot
    pub longitudinal: Tensor<B, 2>,     // [N, M] one-hot
    pub destination: Tensor<B, 2>,      // [N, 2], future at the last valid step
    pub destination_mask: Tensor<B, 2>, // [N, 2]
}

impl<B: Backend> TrajectoryBatch<B> {
    pub fn batch_size(&self) -> usize {
        self.history.dims()[0]
    }

    pub fn horizon(&self) -> usize {
        self.future.dims()[1]
    }
}
