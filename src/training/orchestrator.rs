use std::path::PathBuf;
use std::time::Instant;

use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::ElementConversion;
use tracing::{debug, error, info, warn};

use super::checkpoint::{CheckpointPlan, CheckpointSink};
use super::clip::clip_grad_norm;
use super::evaluation::{EvalSettings, Evaluator};
use super::metrics::MetricsSink;
use super::phase::{LossWeights, Phase};
use super::reporter::ProgressReporter;
use super::sampler::LatentSampler;
use super::source::BatchSource;
use crate::config::{NonFinitePolicy, TrainingConfig};
use crate::data::TrajectoryBatch;
use crate::error::TrainError;
use crate::models::{ForwardMode, TrajectoryPredictor};
use crate::placement::Placement;

/// What a finished run did.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Batches that reached the optimizer.
    pub batches: usize,
    pub skipped_batches: usize,
    pub checkpoints: Vec<PathBuf>,
    pub last_loss: Option<f32>,
    pub last_validation: Option<ValidationSummary>,
}

/// Averages over one in-loop validation pass.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationSummary {
    pub metric: &'static str,
    pub loss: f32,
    pub batches: usize,
    pub dest_best: Option<f32>,
    pub dest_avg: Option<f32>,
}

enum StepOutcome {
    Applied(f32),
    Skipped,
}

/// Drives the two-phase curriculum over a training source, validating at every
/// report boundary and checkpointing after every epoch.
pub struct Orchestrator<B: AutodiffBackend> {
    config: TrainingConfig,
    placement: Placement<B>,
    plan: CheckpointPlan,
}

impl<B: AutodiffBackend> Orchestrator<B> {
    pub fn new(config: TrainingConfig, placement: Placement<B>, plan: CheckpointPlan) -> Self {
        Self {
            config,
            placement,
            plan,
        }
    }

    pub fn run<M, C>(
        &self,
        mut model: M,
        train: &dyn BatchSource<B>,
        valid: &dyn BatchSource<B::InnerBackend>,
        checkpoints: &mut C,
        metrics: &mut dyn MetricsSink,
    ) -> Result<(M, TrainingSummary), TrainError>
    where
        M: AutodiffModule<B> + TrajectoryPredictor<B>,
        M::InnerModule: TrajectoryPredictor<B::InnerBackend>,
        C: CheckpointSink<B, M>,
    {
        let config = &self.config;
        config.validate()?;
        B::seed(config.seed);

        let mut optim = AdamConfig::new().init::<B, M>();
        let mut sampler = LatentSampler::new(config.seed);
        let mut evaluator = Evaluator::new(
            EvalSettings {
                mode: config.validation,
                best_of_n: config.best_of_n,
                latent_sigma: config.latent_sigma,
            },
            config.seed + 1,
        );
        let mut reporter =
            ProgressReporter::new(config.report_interval, config.batch_size, train.len());
        let weights = config.loss_weights();
        let mut summary = TrainingSummary::default();
        let mut step: u64 = 0;

        for epoch in 0..config.total_epochs() {
            let phase = Phase::for_epoch(epoch, config.pretrain_epochs);
            if epoch == 0 && phase == Phase::Pretrain {
                info!("Pretrain with MSE loss");
            } else if epoch == config.pretrain_epochs {
                info!("Train with NLL loss");
            }
            reporter.reset();

            for (i, batch) in train.batches().enumerate() {
                let started = Instant::now();
                let outcome = self.train_step(
                    &mut model,
                    &mut optim,
                    &mut sampler,
                    &batch,
                    phase,
                    weights,
                    (epoch, i),
                )?;
                step += 1;

                let report = match outcome {
                    StepOutcome::Applied(loss) => {
                        summary.batches += 1;
                        summary.last_loss = Some(loss);
                        reporter.record(epoch, i, loss as f64, started.elapsed())
                    }
                    StepOutcome::Skipped => {
                        summary.skipped_batches += 1;
                        reporter.skip(epoch, i, started.elapsed())
                    }
                };
                let Some(report) = report else {
                    continue;
                };
                report.log();
                if report.samples > 0 {
                    metrics.add_scalar("train/loss", report.avg_loss, step);
                }

                if let Some(validation) =
                    self.validate(&model.valid(), valid, &mut evaluator, phase)
                {
                    info!(" | Avg val loss:{:.2}", validation.loss);
                    metrics.add_scalar(
                        &format!("val/{}", validation.metric),
                        validation.loss as f64,
                        step,
                    );
                    if let (Some(best), Some(avg)) = (validation.dest_best, validation.dest_avg) {
                        metrics.add_scalar("val/dest_best", best as f64, step);
                        metrics.add_scalar("val/dest_avg", avg as f64, step);
                    }
                    summary.last_validation = Some(validation);
                }
            }

            let path = self.plan.epoch_path(epoch + 1);
            checkpoints.save(&model, &path)?;
            debug!("checkpoint written to {}", path.display());
            summary.checkpoints.push(path);
            summary.epochs += 1;
            metrics.flush();
        }

        let path = self.plan.final_path();
        checkpoints.save(&model, &path)?;
        info!("Model saved in {}", path.display());
        summary.checkpoints.push(path);

        Ok((model, summary))
    }

    #[allow(clippy::too_many_arguments)]
    fn train_step<M, O>(
        &self,
        model: &mut M,
        optim: &mut O,
        sampler: &mut LatentSampler,
        batch: &TrajectoryBatch<B>,
        phase: Phase,
        weights: LossWeights,
        (epoch, i): (usize, usize),
    ) -> Result<StepOutcome, TrainError>
    where
        M: AutodiffModule<B> + TrajectoryPredictor<B>,
        O: Optimizer<M, B>,
    {
        let noise = sampler.normal(
            batch.batch_size(),
            model.latent_dim(),
            1.0,
            &self.placement,
        );
        let output = model.forward(
            batch,
            batch.destination.clone(),
            noise,
            ForwardMode::TeacherForced,
        );

        let loss = match phase.training_loss(output, batch, weights) {
            Ok(loss) => loss,
            Err(err) => {
                let err = TrainError::from(err);
                if err.is_recoverable() {
                    error!("epoch {}, batch {i}: {err}, skipping", epoch + 1);
                    return Ok(StepOutcome::Skipped);
                }
                return Err(err);
            }
        };

        let value: f32 = loss.clone().into_scalar().elem();
        if !value.is_finite() {
            match self.config.non_finite {
                NonFinitePolicy::Abort => {
                    return Err(TrainError::NonFiniteLoss {
                        epoch,
                        batch: i,
                        value,
                    })
                }
                NonFinitePolicy::SkipBatch => {
                    warn!("epoch {}, batch {i}: loss is {value}, skipping", epoch + 1);
                    return Ok(StepOutcome::Skipped);
                }
            }
        }

        let grads = GradientsParams::from_grads(loss.backward(), &*model);
        let (grads, norm) = clip_grad_norm(&*model, grads, self.config.grad_clip_norm);
        debug!("epoch {}, batch {i}: loss {value:.4}, grad norm {norm:.4}", epoch + 1);

        *model = optim.step(self.config.learning_rate, model.clone(), grads);

        Ok(StepOutcome::Applied(value))
    }

    /// Scores up to `eval_batches` validation batches. `None` when nothing
    /// could be scored.
    fn validate<V: TrajectoryPredictor<B::InnerBackend>>(
        &self,
        model: &V,
        valid: &dyn BatchSource<B::InnerBackend>,
        evaluator: &mut Evaluator,
        phase: Phase,
    ) -> Option<ValidationSummary> {
        let mut loss_sum = 0.0;
        let mut dest = (0.0, 0.0, 0usize);
        let mut scored = 0usize;
        let mut metric = evaluator.reported_phase(phase).metric_name();

        for batch in valid.batches().take(self.config.eval_batches) {
            match evaluator.evaluate::<B::InnerBackend, V>(model, &batch, phase) {
                Ok(outcome) => {
                    metric = outcome.metric;
                    loss_sum += outcome.loss;
                    scored += 1;
                    if let Some(errors) = outcome.destination {
                        dest.0 += errors.best;
                        dest.1 += errors.avg;
                        dest.2 += 1;
                    }
                }
                Err(err) => error!("validation batch skipped: {err}"),
            }
        }

        if scored == 0 {
            return None;
        }
        let (dest_best, dest_avg) = match dest.2 {
            0 => (None, None),
            n => (Some(dest.0 / n as f32), Some(dest.1 / n as f32)),
        };

        Some(ValidationSummary {
            metric,
            loss: loss_sum / scored as f32,
            batches: scored,
            dest_best,
            dest_avg,
        })
    }
}
