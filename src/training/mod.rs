pub mod checkpoint;
pub mod clip;
pub mod evaluation;
pub mod metrics;
pub mod orchestrator;
pub mod phase;
pub mod reporter;
pub mod sampler;
pub mod source;

pub use checkpoint::{CheckpointPlan, CheckpointSink, DryRunSink, RecorderSink};
pub use clip::{clip_grad_norm, global_grad_norm};
pub use evaluation::{select_best_of_n, BestOfN, EvalSettings, Evaluator, ValidationOutcome};
pub use metrics::{CsvMetrics, MemoryMetrics, MetricsSink, NoMetrics};
pub use orchestrator::{Orchestrator, TrainingSummary, ValidationSummary};
pub use phase::{LossTerms, LossWeights, Phase};
pub use reporter::{ProgressReport, ProgressReporter};
pub use sampler::LatentSampler;
pub use source::{BatchSource, LoaderSource};
