//! Training CLI surface for host applications.

use std::path::PathBuf;

use clap::Args;

/// Command line arguments mapping onto `SolverConfig`.
#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    #[arg(long, default_value_t = 10)]
    pub n_epochs: usize,

    #[arg(long, default_value_t = 100)]
    pub batch_size: usize,

    /// Beam width passed through to the decoder.
    #[arg(long, default_value_t = 3)]
    pub beam_size: usize,

    /// Update rule: adam or rmsprop.
    #[arg(long, default_value = "adam")]
    pub optimizer: String,

    #[arg(long, default_value_t = 0.01)]
    pub learning_rate: f64,

    #[arg(long, default_value = "CIDEr")]
    pub metric: String,

    /// Attention-coverage regularization coefficient.
    #[arg(long, default_value_t = 1.0)]
    pub alpha_c: f64,

    /// Checkpoint interval in iterations.
    #[arg(long, default_value_t = 100)]
    pub snapshot_steps: usize,

    /// Validation interval in iterations.
    #[arg(long, default_value_t = 200)]
    pub eval_every: usize,

    #[arg(long, default_value = "./log/")]
    pub log_dir: PathBuf,

    #[arg(long, default_value = "./model/")]
    pub checkpoint_dir: PathBuf,

    /// Checkpoint metadata file to resume from.
    #[arg(long)]
    pub checkpoint: Option<PathBuf>,

    #[arg(long, default_value = "cuda:0")]
    pub device: String,

    /// Root directory for per-split caption artifacts.
    #[arg(long, default_value = "./data/")]
    pub data_dir: PathBuf,

    /// Maximum generated sequence length at evaluation time.
    #[arg(long, default_value_t = 31)]
    pub max_decode_steps: usize,

    /// Base seed for the per-epoch shuffle.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,
}
