use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::data::dataset::{Dataset, InMemDataset};
use burn::tensor::backend::Backend;

use crate::data::{SceneBatcher, SceneItem, TrajectoryBatch};

/// Supplier of collated batches. The orchestrator only sees complete batches
/// and the number of scenes per epoch.
pub trait BatchSource<B: Backend> {
    fn batches(&self) -> Box<dyn Iterator<Item = TrajectoryBatch<B>> + '_>;

    /// Number of scenes in one pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// burn data loader over a scene dataset.
pub struct LoaderSource<B: Backend> {
    loader: Arc<dyn DataLoader<TrajectoryBatch<B>>>,
    scenes: usize,
}

impl<B: Backend> LoaderSource<B> {
    pub fn new(
        dataset: InMemDataset<SceneItem>,
        batcher: SceneBatcher<B>,
        batch_size: usize,
        num_workers: usize,
        seed: u64,
    ) -> Self {
        let scenes = dataset.len();
        let loader = DataLoaderBuilder::new(batcher)
            .batch_size(batch_size)
            .shuffle(seed)
            .num_workers(num_workers)
            .build(dataset);

        Self { loader, scenes }
    }
}

impl<B: Backend> BatchSource<B> for LoaderSource<B> {
    fn batches(&self) -> Box<dyn Iterator<Item = TrajectoryBatch<B>> + '_> {
        Box::new(self.loader.iter())
    }

    fn len(&self) -> usize {
        self.scenes
    }
}

/// Pre-built batches, replayed in order every epoch.
impl<B: Backend> BatchSource<B> for Vec<TrajectoryBatch<B>> {
    fn batches(&self) -> Box<dyn Iterator<Item = TrajectoryBatch<B>> + '_> {
        Box::new(self.iter().cloned())
    }

    fn len(&self) -> usize {
        self.iter().map(|batch| batch.batch_size()).sum()
    }
}
