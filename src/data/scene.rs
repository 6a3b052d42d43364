use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::{Dataset, InMemDataset};
use burn::tensor::backend::Backend;
use burn::tensor::{Data, Shape, Tensor};
use serde::{Deserialize, Serialize};

use crate::config::TrainingConfig;
use crate::data::batch::TrajectoryBatch;
use crate::error::TrainError;
use crate::placement::Placement;

/// One scene as stored in a JSON-rows file. Sequences may be shorter than the
/// configured lengths; the batcher pads them and records validity masks.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SceneItem {
    pub history: Vec<[f32; 2]>,
    #[serde(default)]
    pub neighbors: Vec<Vec<[f32; 2]>>,
    #[serde(default)]
    pub plan: Vec<[f32; 2]>,
    pub future: Vec<[f32; 2]>,
    pub lateral: usize,
    pub longitudinal: usize,
}

impl SceneItem {
    fn check(&self, layout: &SceneLayout) -> Result<(), String> {
        if self.history.is_empty() {
            return Err("empty history".to_string());
        }
        if self.lateral >= layout.num_lateral {
            return Err(format!(
                "lateral class {} out of range 0..{}",
                self.lateral, layout.num_lateral
            ));
        }
        if self.longitudinal >= layout.num_longitudinal {
            return Err(format!(
                "longitudinal class {} out of range 0..{}",
                self.longitudinal, layout.num_longitudinal
            ));
        }
        Ok(())
    }
}

/// Fixed sizes every batch is padded to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SceneLayout {
    pub history_len: usize,
    pub horizon: usize,
    pub max_neighbors: usize,
    pub num_lateral: usize,
    pub num_longitudinal: usize,
}

impl SceneLayout {
    pub fn from_config(config: &TrainingConfig) -> Self {
        Self {
            history_len: config.model.history_len,
            horizon: config.model.horizon,
            max_neighbors: config.max_neighbors,
            num_lateral: config.model.num_lateral,
            num_longitudinal: config.model.num_longitudinal,
        }
    }
}

pub fn load_scenes(path: &str, layout: &SceneLayout) -> Result<InMemDataset<SceneItem>, TrainError> {
    let dataset: InMemDataset<SceneItem> = InMemDataset::from_json_rows(path)
        .map_err(|err| TrainError::Dataset(format!("{path}: {err}")))?;

    for (row, item) in dataset.iter().enumerate() {
        item.check(layout)
            .map_err(|reason| TrainError::Dataset(format!("{path}, row {row}: {reason}")))?;
    }

    Ok(dataset)
}

/// Keeps the latest `len` points, left-padding short histories with their first point.
fn fit_history(points: &[[f32; 2]], len: usize, out: &mut Vec<f32>) {
    let kept = &points[points.len().saturating_sub(len)..];
    let pad = len - kept.len();
    let first = kept.first().copied().unwrap_or([0.0, 0.0]);

    for _ in 0..pad {
        out.extend_from_slice(&first);
    }
    for point in kept {
        out.extend_from_slice(point);
    }
}

/// Writes `len` points padded with zeros and the matching 0/1 mask.
fn pad_steps(points: &[[f32; 2]], len: usize, values: &mut Vec<f32>, mask: &mut Vec<f32>) {
    for step in 0..len {
        match points.get(step) {
            Some(point) => {
                values.extend_from_slice(point);
                mask.extend_from_slice(&[1.0, 1.0]);
            }
            None => {
                values.extend_from_slice(&[0.0, 0.0]);
                mask.extend_from_slice(&[0.0, 0.0]);
            }
        }
    }
}

fn one_hot(class: usize, classes: usize, out: &mut Vec<f32>) {
    out.extend((0..classes).map(|c| if c == class { 1.0 } else { 0.0 }));
}

pub struct SceneBatcher<B: Backend> {
    placement: Placement<B>,
    layout: SceneLayout,
}

impl<B: Backend> SceneBatcher<B> {
    pub fn new(placement: Placement<B>, layout: SceneLayout) -> Self {
        Self { placement, layout }
    }

    fn tensor<const D: usize>(&self, values: Vec<f32>, dims: [usize; D]) -> Tensor<B, D> {
        let data = Data::new(values, Shape::new(dims));
        Tensor::<B, D>::from_data(data.convert()).to_device(self.placement.device())
    }
}

impl<B: Backend> Batcher<SceneItem, TrajectoryBatch<B>> for SceneBatcher<B> {
    fn batch(&self, items: Vec<SceneItem>) -> TrajectoryBatch<B> {
        let n = items.len();
        let SceneLayout {
            history_len,
            horizon,
            max_neighbors,
            num_lateral,
            num_longitudinal,
        } = self.layout;

        let mut history = Vec::with_capacity(n * history_len * 2);
        let mut neighbors = Vec::with_capacity(n * max_neighbors * history_len * 2);
        let mut neighbor_mask = Vec::with_capacity(n * max_neighbors);
        let mut plan = Vec::with_capacity(n * horizon * 2);
        let mut plan_mask = Vec::with_capacity(n * horizon * 2);
        let mut future = Vec::with_capacity(n * horizon * 2);
        let mut future_mask = Vec::with_capacity(n * horizon * 2);
        let mut lateral = Vec::with_capacity(n * num_lateral);
        let mut longitudinal = Vec::with_capacity(n * num_longitudinal);
        let mut destination = Vec::with_capacity(n * 2);
        let mut destination_mask = Vec::with_capacity(n * 2);

        for item in items.iter() {
            fit_history(&item.history, history_len, &mut history);

            for slot in 0..max_neighbors {
                match item.neighbors.get(slot).filter(|points| !points.is_empty()) {
                    Some(points) => {
                        fit_history(points, history_len, &mut neighbors);
                        neighbor_mask.push(1.0);
                    }
                    None => {
                        neighbors.extend(std::iter::repeat(0.0).take(history_len * 2));
                        neighbor_mask.push(0.0);
                    }
                }
            }

            pad_steps(&item.plan, horizon, &mut plan, &mut plan_mask);
            pad_steps(&item.future, horizon, &mut future, &mut future_mask);

            // Destination is the last valid future point, taken before padding reaches the device.
            let valid = item.future.len().min(horizon);
            match valid.checked_sub(1).map(|last| item.future[last]) {
                Some(point) => {
                    destination.extend_from_slice(&point);
                    destination_mask.extend_from_slice(&[1.0, 1.0]);
                }
                None => {
                    destination.extend_from_slice(&[0.0, 0.0]);
                    destination_mask.extend_from_slice(&[0.0, 0.0]);
                }
            }

            one_hot(item.lateral, num_lateral, &mut lateral);
            one_hot(item.longitudinal, num_longitudinal, &mut longitudinal);
        }

        TrajectoryBatch {
            history: self.tensor(history, [n, history_len, 2]),
            neighbors: self.tensor(neighbors, [n, max_neighbors, history_len, 2]),
            neighbor_mask: self.tensor(neighbor_mask, [n, max_neighbors]),
            plan: self.tensor(plan, [n, horizon, 2]),
            plan_mask: self.tensor(plan_mask, [n, horizon, 2]),
            future: self.tensor(future, [n, horizon, 2]),
            future_mask: self.tensor(future_mask, [n, horizon, 2]),
            lateral: self.tensor(lateral, [n, num_lateral]),
            longitudinal: self.tensor(longitudinal, [n, num_longitudinal]),
            destination: self.tensor(destination, [n, 2]),
            destination_mask: self.tensor(destination_mask, [n, 2]),
        }
    }
}
