//! Command-line entry point: trains the reference planning-informed predictor
//! on JSON-rows scene files and writes checkpoints, logs and metrics under
//! `{out_dir}/{name}/`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::module::Module;
use clap::Parser;

use plantraj::config::{NonFinitePolicy, TrainingConfig, ValidationMode};
use plantraj::data::{load_scenes, SceneBatcher, SceneLayout};
use plantraj::logging;
use plantraj::placement::Placement;
use plantraj::training::{
    BatchSource, CheckpointPlan, CsvMetrics, LoaderSource, MetricsSink, NoMetrics, Orchestrator,
    RecorderSink,
};

type TrainBackend = Autodiff<NdArray<f32>>;
type EvalBackend = NdArray<f32>;

/// Train a planning-informed multi-modal trajectory predictor
#[derive(Parser, Debug)]
#[command(name = "plantraj")]
#[command(version)]
#[command(about, long_about = None)]
struct Cli {
    /// Run name, also the directory and checkpoint stem
    #[arg(long)]
    name: Option<String>,

    /// JSON-rows file with training scenes
    #[arg(long, value_name = "FILE")]
    train_set: PathBuf,

    /// JSON-rows file with validation scenes
    #[arg(long, value_name = "FILE")]
    val_set: PathBuf,

    /// Start from a saved configuration; flags below override it
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[arg(long)]
    batch_size: Option<usize>,

    #[arg(long)]
    learning_rate: Option<f64>,

    /// Epochs trained with the MSE trajectory loss
    #[arg(long)]
    pretrain_epochs: Option<usize>,

    /// Epochs trained with the NLL trajectory loss
    #[arg(long)]
    train_epochs: Option<usize>,

    /// Destination samples drawn per scene during validation
    #[arg(long)]
    best_of_n: Option<usize>,

    #[arg(long)]
    num_workers: Option<usize>,

    /// Maximum global gradient norm
    #[arg(long)]
    grad_clip: Option<f32>,

    #[arg(long)]
    seed: Option<u64>,

    /// Validate with teacher-forced MSE in every phase
    #[arg(long)]
    legacy_validation: bool,

    /// Skip batches with a NaN or infinite loss instead of aborting
    #[arg(long)]
    skip_nonfinite: bool,

    /// Write scalar curves to metrics.csv in the run directory
    #[arg(long)]
    metrics: bool,

    #[arg(long, default_value = "trained_models")]
    out_dir: PathBuf,
}

impl Cli {
    fn training_config(&self) -> Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .map_err(|err| anyhow!("failed to load {}: {err:?}", path.display()))?,
            None => TrainingConfig::new(),
        };

        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(v) = self.batch_size {
            config.batch_size = v;
        }
        if let Some(v) = self.learning_rate {
            config.learning_rate = v;
        }
        if let Some(v) = self.pretrain_epochs {
            config.pretrain_epochs = v;
        }
        if let Some(v) = self.train_epochs {
            config.train_epochs = v;
        }
        if let Some(v) = self.best_of_n {
            config.best_of_n = v;
        }
        if let Some(v) = self.num_workers {
            config.num_workers = v;
        }
        if let Some(v) = self.grad_clip {
            config.grad_clip_norm = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if self.legacy_validation {
            config.validation = ValidationMode::PretrainOnly;
        }
        if self.skip_nonfinite {
            config.non_finite = NonFinitePolicy::SkipBatch;
        }

        config.validate()?;
        Ok(config)
    }
}

fn path_str(path: &Path) -> Result<&str> {
    path.to_str()
        .ok_or_else(|| anyhow!("path is not valid UTF-8: {}", path.display()))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.training_config()?;

    let run_dir = cli.out_dir.join(&config.name);
    fs::create_dir_all(&run_dir)
        .with_context(|| format!("failed to create {}", run_dir.display()))?;
    logging::init(run_dir.join("train.log"))?;
    config
        .save(run_dir.join("config.json"))
        .context("failed to save config.json")?;

    tracing::info!("------------- {} -------------", config.name);
    tracing::info!("Batch size : {}", config.batch_size);
    tracing::info!("Learning rate : {}", config.learning_rate);

    let device = NdArrayDevice::Cpu;
    let layout = SceneLayout::from_config(&config);

    tracing::info!("Train dataset: {}", cli.train_set.display());
    let train_scenes = load_scenes(path_str(&cli.train_set)?, &layout)?;
    tracing::info!("Validation dataset: {}", cli.val_set.display());
    let val_scenes = load_scenes(path_str(&cli.val_set)?, &layout)?;

    let train = LoaderSource::new(
        train_scenes,
        SceneBatcher::<TrainBackend>::new(Placement::new(device), layout),
        config.batch_size,
        config.num_workers,
        config.seed,
    );
    let valid = LoaderSource::new(
        val_scenes,
        SceneBatcher::<EvalBackend>::new(Placement::new(device), layout),
        config.batch_size,
        config.num_workers,
        config.seed + 1,
    );
    tracing::info!(
        "DataSet Prepared : {} train data, {} validation data",
        train.len(),
        valid.len()
    );

    let model = config.model.init::<TrainBackend>().to_device(&device);
    tracing::debug!("Network structure: {model:?}");

    let mut metrics: Box<dyn MetricsSink> = if cli.metrics {
        Box::new(CsvMetrics::create(run_dir.join("metrics.csv"))?)
    } else {
        Box::new(NoMetrics)
    };

    let plan = CheckpointPlan::new(run_dir.clone(), &config.name);
    let orchestrator = Orchestrator::<TrainBackend>::new(config, Placement::new(device), plan);
    let (_, summary) = orchestrator.run(
        model,
        &train,
        &valid,
        &mut RecorderSink::new(),
        metrics.as_mut(),
    )?;

    tracing::info!(
        "finished {} epochs, {} batches trained, {} skipped",
        summary.epochs,
        summary.batches,
        summary.skipped_batches
    );

    Ok(())
}
