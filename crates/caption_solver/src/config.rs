//! Solver configuration.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::optim::OptimizerKind;
use crate::train::args::TrainArgs;

/// Which split an evaluation pass runs over. Validation results are scored;
/// test results are only persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Val,
    Test,
}

impl Split {
    pub fn name(&self) -> &'static str {
        match self {
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SolverConfig {
    pub n_epochs: usize,
    pub batch_size: usize,
    /// Decoder beam width; opaque to the training core.
    pub beam_size: usize,
    pub optimizer: OptimizerKind,
    pub learning_rate: f64,
    /// Headline metric name reported from validation scoring.
    pub metric: String,
    /// Attention-coverage regularization coefficient; 0 disables the term.
    pub alpha_c: f64,
    /// Checkpoint every this many iterations.
    pub snapshot_steps: usize,
    /// Validate every this many iterations.
    pub eval_every: usize,
    pub log_dir: PathBuf,
    pub checkpoint_dir: PathBuf,
    /// Checkpoint metadata file to resume from. Consumed exactly once at
    /// startup; a missing or corrupt file aborts the run.
    pub checkpoint: Option<PathBuf>,
    /// Compute device identifier, `cpu` or `cuda:N`.
    pub device: String,
    /// Root directory for the per-split candidate-caption artifacts.
    pub data_dir: PathBuf,
    /// Upper bound on generated sequence length at evaluation time.
    pub max_decode_steps: usize,
    /// Base seed for the once-per-epoch shuffle.
    pub seed: u64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            n_epochs: 10,
            batch_size: 100,
            beam_size: 3,
            optimizer: OptimizerKind::Adam,
            learning_rate: 0.01,
            metric: "CIDEr".to_string(),
            alpha_c: 1.0,
            snapshot_steps: 100,
            eval_every: 200,
            log_dir: PathBuf::from("./log/"),
            checkpoint_dir: PathBuf::from("./model/"),
            checkpoint: None,
            device: "cuda:0".to_string(),
            data_dir: PathBuf::from("./data/"),
            max_decode_steps: 31,
            seed: 42,
        }
    }
}

impl SolverConfig {
    pub fn from_args(args: &TrainArgs) -> Result<Self> {
        Ok(Self {
            n_epochs: args.n_epochs,
            batch_size: args.batch_size,
            beam_size: args.beam_size,
            optimizer: OptimizerKind::parse(&args.optimizer)?,
            learning_rate: args.learning_rate,
            metric: args.metric.clone(),
            alpha_c: args.alpha_c,
            snapshot_steps: args.snapshot_steps,
            eval_every: args.eval_every,
            log_dir: args.log_dir.clone(),
            checkpoint_dir: args.checkpoint_dir.clone(),
            checkpoint: args.checkpoint.clone(),
            device: args.device.clone(),
            data_dir: args.data_dir.clone(),
            max_decode_steps: args.max_decode_steps,
            seed: args.seed,
        })
    }

    /// Fixed per-split path of the candidate-caption artifact.
    pub fn candidate_caption_path(&self, split: Split) -> PathBuf {
        self.data_dir
            .join(split.name())
            .join(format!("{}.candidate.captions.json", split.name()))
    }
}
