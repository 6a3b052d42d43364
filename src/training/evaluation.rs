//! Validation of a generative trajectory model.
//!
//! A model whose destination distribution is multi-modal is judged by its best
//! hypothesis: N destinations are drawn per scene, the closest one to the true
//! destination is kept, and the full future is decoded from it.

use burn::tensor::{backend::Backend, Data, ElementConversion, Int, Shape, Tensor};

use super::phase::Phase;
use super::sampler::LatentSampler;
use crate::config::ValidationMode;
use crate::data::TrajectoryBatch;
use crate::error::LossError;
use crate::losses::{masked_mse, masked_nll_eval};
use crate::models::{ForwardMode, TrajectoryPredictor};
use crate::placement::Placement;

/// Reduction of one best-of-N sample set.
#[derive(Clone, Debug)]
pub struct BestOfN<B: Backend> {
    /// Best candidate per scene, `[N, 2]`.
    pub best: Tensor<B, 2>,
    /// Index of the chosen sample per scene.
    pub indices: Vec<usize>,
    /// Mean over valid scenes of the smallest L2 error.
    pub best_error: f32,
    /// Mean L2 error over every sample and valid scene.
    pub avg_error: f32,
}

/// Picks, per scene, the candidate closest to `truth`. Ties go to the lowest
/// sample index. `candidates` holds one `[N, 2]` tensor per sample; scenes
/// whose `[N, 2]` destination mask is zero still get a candidate but do not
/// enter the error averages.
pub fn select_best_of_n<B: Backend>(
    candidates: Vec<Tensor<B, 2>>,
    truth: Tensor<B, 2>,
    mask: Tensor<B, 2>,
) -> Result<BestOfN<B>, LossError> {
    const OP: &str = "select_best_of_n";

    if candidates.is_empty() {
        return Err(LossError::DegenerateBatch { op: OP });
    }
    let samples = candidates.len();
    let [scenes, coords] = truth.dims();
    if mask.dims() != [scenes, coords] {
        return Err(LossError::ShapeMismatch {
            op: OP,
            expected: vec![scenes, coords],
            got: mask.dims().to_vec(),
        });
    }
    if let Some(bad) = candidates.iter().find(|c| c.dims() != [scenes, coords]) {
        return Err(LossError::ShapeMismatch {
            op: OP,
            expected: vec![scenes, coords],
            got: bad.dims().to_vec(),
        });
    }

    let weights: Vec<f32> = mask
        .slice([0..scenes, 0..1])
        .into_data()
        .convert::<f32>()
        .value;
    let valid = weights.iter().sum::<f32>();
    if valid <= 0.0 {
        return Err(LossError::DegenerateBatch { op: OP });
    }
    let device = truth.device();

    let stacked: Tensor<B, 3> = Tensor::stack(candidates, 0);
    let diff = stacked.clone() - truth.unsqueeze_dim(0);
    let errors = (diff.clone() * diff).sum_dim(2).sqrt();
    let errors = errors.into_data().convert::<f32>().value;

    let mut indices = Vec::with_capacity(scenes);
    let mut min_sum = 0.0;
    let mut all_sum = 0.0;
    for (scene, weight) in weights.iter().enumerate() {
        let mut best = 0;
        for sample in 0..samples {
            let error = errors[sample * scenes + scene];
            all_sum += weight * error;
            if error < errors[best * scenes + scene] {
                best = sample;
            }
        }
        min_sum += weight * errors[best * scenes + scene];
        indices.push(best);
    }

    let rows: Vec<i64> = indices
        .iter()
        .enumerate()
        .map(|(scene, sample)| (sample * scenes + scene) as i64)
        .collect();
    let rows = Tensor::<B, 1, Int>::from_data(Data::new(rows, Shape::new([scenes])).convert())
        .to_device(&device);
    let best = stacked.reshape([samples * scenes, coords]).select(0, rows);

    Ok(BestOfN {
        best,
        indices,
        best_error: min_sum / valid,
        avg_error: all_sum / (samples as f32 * valid),
    })
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DestinationErrors {
    pub best: f32,
    pub avg: f32,
}

/// Score of one validation batch.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ValidationOutcome {
    pub metric: &'static str,
    pub loss: f32,
    pub destination: Option<DestinationErrors>,
}

#[derive(Clone, Copy, Debug)]
pub struct EvalSettings {
    pub mode: ValidationMode,
    pub best_of_n: usize,
    pub latent_sigma: f32,
}

/// Scores validation batches. Noise is drawn on the device the batch lives on.
pub struct Evaluator {
    settings: EvalSettings,
    sampler: LatentSampler,
}

impl Evaluator {
    pub fn new(settings: EvalSettings, seed: u64) -> Self {
        Self {
            settings,
            sampler: LatentSampler::new(seed),
        }
    }

    /// Phase whose metric is actually reported under the configured mode.
    pub fn reported_phase(&self, phase: Phase) -> Phase {
        match self.settings.mode {
            ValidationMode::Intended => phase,
            ValidationMode::PretrainOnly => Phase::Pretrain,
        }
    }

    pub fn evaluate<B: Backend, M: TrajectoryPredictor<B>>(
        &mut self,
        model: &M,
        batch: &TrajectoryBatch<B>,
        phase: Phase,
    ) -> Result<ValidationOutcome, LossError> {
        match self.reported_phase(phase) {
            Phase::Pretrain => self.teacher_forced_mse(model, batch),
            Phase::Distributional => self.best_of_n_nll(model, batch),
        }
    }

    fn teacher_forced_mse<B: Backend, M: TrajectoryPredictor<B>>(
        &mut self,
        model: &M,
        batch: &TrajectoryBatch<B>,
    ) -> Result<ValidationOutcome, LossError> {
        let noise = Tensor::<B, 2>::zeros([batch.batch_size(), model.latent_dim()])
            .to_device(&batch.history.device());
        let output = model.forward(
            batch,
            batch.destination.clone(),
            noise,
            ForwardMode::TeacherForced,
        );
        let loss = masked_mse(output.future, batch.future.clone(), batch.future_mask.clone())?;

        Ok(ValidationOutcome {
            metric: Phase::Pretrain.metric_name(),
            loss: loss.into_scalar().elem(),
            destination: None,
        })
    }

    fn best_of_n_nll<B: Backend, M: TrajectoryPredictor<B>>(
        &mut self,
        model: &M,
        batch: &TrajectoryBatch<B>,
    ) -> Result<ValidationOutcome, LossError> {
        let scenes = batch.batch_size();
        let latent = model.latent_dim();
        let placement = Placement::new(batch.history.device());

        // The scene is encoded once and shared by every candidate.
        let encoding = model.encode(batch, ForwardMode::Generative);

        let candidates: Vec<Tensor<B, 2>> = (0..self.settings.best_of_n)
            .map(|_| {
                let noise = self.sampler.normal(
                    scenes,
                    latent,
                    self.settings.latent_sigma,
                    &placement,
                );
                model.sample_destination(&encoding, noise).detach()
            })
            .collect();
        let selection = select_best_of_n(
            candidates,
            batch.destination.clone(),
            batch.destination_mask.clone(),
        )?;

        let future = model.predict(&encoding, selection.best);
        let loss = masked_nll_eval(
            future,
            batch.future.clone(),
            batch.future_mask.clone(),
            true,
        )?
        .mean();

        Ok(ValidationOutcome {
            metric: Phase::Distributional.metric_name(),
            loss: loss.into_scalar().elem(),
            destination: Some(DestinationErrors {
                best: selection.best_error,
                avg: selection.avg_error,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PredictorOutput, SceneEncoding};
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn t2(rows: [[f32; 2]; 3]) -> Tensor<TestBackend, 2> {
        Tensor::from_floats(rows)
    }

    fn all_valid() -> Tensor<TestBackend, 2> {
        Tensor::ones([3, 2])
    }

    fn values(t: Tensor<TestBackend, 2>) -> Vec<f32> {
        t.into_data().convert::<f32>().value
    }

    #[test]
    fn single_sample_degenerates_to_its_own_error() {
        let truth = t2([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);
        let sample = t2([[3.0, 4.0], [1.0, 1.0], [2.0, 0.0]]);

        let result = select_best_of_n(vec![sample.clone()], truth, all_valid()).unwrap();

        let expected = (5.0 + 0.0 + 2.0) / 3.0;
        assert!((result.best_error - expected).abs() < 1e-5);
        assert!((result.avg_error - expected).abs() < 1e-5);
        assert_eq!(result.indices, vec![0, 0, 0]);
        assert_eq!(values(result.best), values(sample));
    }

    #[test]
    fn best_error_never_exceeds_average_error() {
        let truth = t2([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);
        let a = t2([[1.0, 0.0], [1.0, 5.0], [2.0, 2.5]]);
        let b = t2([[0.0, 3.0], [1.0, 1.5], [9.0, 2.0]]);
        let c = t2([[0.5, 0.0], [4.0, 1.0], [2.0, 2.0]]);

        let result = select_best_of_n(vec![a, b, c], truth, all_valid()).unwrap();

        assert_eq!(result.indices, vec![2, 1, 2]);
        assert!(result.best_error <= result.avg_error);
        assert!((result.best_error - (0.5 + 0.5 + 0.0) / 3.0).abs() < 1e-5);
        assert_eq!(
            values(result.best),
            vec![0.5, 0.0, 1.0, 1.5, 2.0, 2.0]
        );
    }

    #[test]
    fn ties_pick_the_lowest_sample_index() {
        let truth = t2([[0.0, 0.0], [0.0, 0.0], [0.0, 0.0]]);
        let a = t2([[1.0, 0.0], [2.0, 0.0], [0.0, 1.0]]);
        let b = t2([[0.0, 1.0], [0.0, 1.0], [0.0, 1.0]]);

        let result = select_best_of_n(vec![a, b], truth, all_valid()).unwrap();

        assert_eq!(result.indices, vec![0, 1, 0]);
    }

    #[test]
    fn masked_scenes_do_not_enter_the_errors() {
        let truth = t2([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);
        let a = t2([[3.0, 4.0], [1.0, 1.0], [50.0, 2.0]]);
        let b = t2([[0.0, 1.0], [1.0, 3.0], [90.0, 2.0]]);
        let mask = t2([[1.0, 1.0], [1.0, 1.0], [0.0, 0.0]]);

        let result = select_best_of_n(vec![a, b], truth, mask).unwrap();

        assert_eq!(result.indices, vec![1, 0, 0]);
        assert!((result.best_error - (1.0 + 0.0) / 2.0).abs() < 1e-5);
        assert!((result.avg_error - (5.0 + 1.0 + 0.0 + 2.0) / 4.0).abs() < 1e-5);
    }

    #[test]
    fn empty_or_fully_masked_sets_are_rejected() {
        let truth = t2([[0.0, 0.0], [1.0, 1.0], [2.0, 2.0]]);

        let empty = select_best_of_n(Vec::new(), truth.clone(), all_valid());
        let masked = select_best_of_n(vec![truth.clone()], truth.clone(), Tensor::zeros([3, 2]));
        let wrong_mask = select_best_of_n(vec![truth.clone()], truth, Tensor::ones([2, 2]));

        assert!(matches!(empty, Err(LossError::DegenerateBatch { .. })));
        assert!(matches!(masked, Err(LossError::DegenerateBatch { .. })));
        assert!(matches!(wrong_mask, Err(LossError::ShapeMismatch { .. })));
    }

    /// Deterministic stand-in: candidates are the noise itself, futures repeat
    /// the destination at every step with unit variance.
    struct EchoModel;

    impl TrajectoryPredictor<TestBackend> for EchoModel {
        fn latent_dim(&self) -> usize {
            2
        }

        fn encode(
            &self,
            batch: &TrajectoryBatch<TestBackend>,
            _mode: ForwardMode,
        ) -> SceneEncoding<TestBackend> {
            let n = batch.batch_size();
            SceneEncoding {
                context: Tensor::zeros([n, 1]),
                lateral: batch.lateral.clone(),
                longitudinal: batch.longitudinal.clone(),
                conditioning: Tensor::zeros([n, 1]),
            }
        }

        fn forward(
            &self,
            batch: &TrajectoryBatch<TestBackend>,
            destination: Tensor<TestBackend, 2>,
            _noise: Tensor<TestBackend, 2>,
            mode: ForwardMode,
        ) -> PredictorOutput<TestBackend> {
            let encoding = self.encode(batch, mode);
            let n = batch.batch_size();
            PredictorOutput {
                future: self.predict(&encoding, destination.clone()),
                lateral: encoding.lateral,
                longitudinal: encoding.longitudinal,
                destination,
                mu: Tensor::zeros([n, 2]),
                logvar: Tensor::zeros([n, 2]),
            }
        }

        fn sample_destination(
            &self,
            _encoding: &SceneEncoding<TestBackend>,
            noise: Tensor<TestBackend, 2>,
        ) -> Tensor<TestBackend, 2> {
            noise
        }

        fn predict(
            &self,
            _encoding: &SceneEncoding<TestBackend>,
            destination: Tensor<TestBackend, 2>,
        ) -> Tensor<TestBackend, 3> {
            let [n, _] = destination.dims();
            let mean: Tensor<TestBackend, 3> = destination.unsqueeze_dim(1);
            let params = Tensor::cat(
                vec![
                    mean,
                    Tensor::ones([n, 1, 2]),
                    Tensor::zeros([n, 1, 1]),
                ],
                2,
            );
            params.repeat(1, 2)
        }
    }

    fn batch() -> TrajectoryBatch<TestBackend> {
        TrajectoryBatch {
            history: Tensor::zeros([1, 2, 2]),
            neighbors: Tensor::zeros([1, 1, 2, 2]),
            neighbor_mask: Tensor::zeros([1, 1]),
            plan: Tensor::zeros([1, 2, 2]),
            plan_mask: Tensor::zeros([1, 2, 2]),
            future: Tensor::from_floats([[[0.0, 0.0], [0.0, 0.0]]]),
            future_mask: Tensor::from_floats([[[1.0, 1.0], [0.0, 0.0]]]),
            lateral: Tensor::from_floats([[1.0, 0.0, 0.0]]),
            longitudinal: Tensor::from_floats([[1.0, 0.0]]),
            destination: Tensor::from_floats([[0.0, 0.0]]),
            destination_mask: Tensor::ones([1, 2]),
        }
    }

    fn settings(mode: ValidationMode, best_of_n: usize) -> EvalSettings {
        EvalSettings {
            mode,
            best_of_n,
            latent_sigma: 1.0,
        }
    }

    #[test]
    fn pretrain_validation_uses_teacher_forced_mse() {
        let mut evaluator = Evaluator::new(
            settings(ValidationMode::Intended, 5),
            1,
        );

        let outcome = evaluator.evaluate(&EchoModel, &batch(), Phase::Pretrain).unwrap();

        assert_eq!(outcome.metric, "RMSE");
        assert_eq!(outcome.loss, 0.0);
        assert!(outcome.destination.is_none());
    }

    #[test]
    fn distributional_validation_scores_the_best_candidate() {
        let mut evaluator = Evaluator::new(
            settings(ValidationMode::Intended, 16),
            1,
        );

        let outcome = evaluator
            .evaluate(&EchoModel, &batch(), Phase::Distributional)
            .unwrap();
        let errors = outcome.destination.unwrap();

        assert_eq!(outcome.metric, "NLL");
        assert!(errors.best <= errors.avg);
        // Unit-variance NLL at distance d from the mean: ln(2 pi) + d^2 / 2.
        let expected = 1.837_877 + errors.best * errors.best / 2.0;
        assert!((outcome.loss - expected).abs() < 1e-4);
    }

    #[test]
    fn pretrain_only_mode_always_scores_mse() {
        let mut evaluator = Evaluator::new(
            settings(ValidationMode::PretrainOnly, 16),
            1,
        );

        let outcome = evaluator
            .evaluate(&EchoModel, &batch(), Phase::Distributional)
            .unwrap();

        assert_eq!(outcome.metric, "RMSE");
        assert!(outcome.destination.is_none());
    }
}
