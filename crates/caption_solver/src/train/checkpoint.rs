//! Checkpoint persistence: iteration-named snapshots of the full training
//! state.
//!
//! Each snapshot is three sibling files under the checkpoint directory:
//! `{iter}.safetensors` (model weights), `{iter}.optim.safetensors`
//! (optimizer moments) and `{iter}.json` (metadata). Snapshots are never
//! overwritten in place — distinct filenames per iteration mean a failed
//! write cannot corrupt an earlier recovery point.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::Result;
use candle_nn::VarMap;
use fs2::FileExt;

use caption_engine::SolverError;

use crate::optim::SolverOptimizer;

/// Snapshot metadata serialized alongside the weight files.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct TrainingState {
    pub epoch: usize,
    pub iteration: usize,
    pub loss: f32,
    /// Optimizer bias-correction step counter.
    pub optimizer_steps: usize,
    pub checkpoint: String,
    pub optimizer_checkpoint: String,
    pub date: String,
}

fn save_securely(varmap: &VarMap, path: &Path) -> Result<()> {
    let lock_path = path.with_extension("lock");
    let lock_file = File::create(&lock_path)?;
    lock_file.lock_exclusive()?;
    let saved = varmap.save(path);
    lock_file.unlock()?;
    saved?;
    Ok(())
}

/// Persist one snapshot named by iteration. The directory is created if
/// absent.
pub fn save(
    dir: &Path,
    epoch: usize,
    iteration: usize,
    loss: f32,
    varmap: &VarMap,
    optimizer: &SolverOptimizer,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;

    let model_name = format!("{}.safetensors", iteration);
    let optim_name = format!("{}.optim.safetensors", iteration);
    save_securely(varmap, &dir.join(&model_name))?;
    optimizer.save_state(dir.join(&optim_name))?;

    let state = TrainingState {
        epoch,
        iteration,
        loss,
        optimizer_steps: optimizer.steps(),
        checkpoint: model_name,
        optimizer_checkpoint: optim_name,
        date: chrono::Local::now().to_rfc3339(),
    };
    let meta_path = dir.join(format!("{}.json", iteration));
    let file = File::create(&meta_path)?;
    serde_json::to_writer_pretty(file, &state)?;

    Ok(meta_path)
}

/// Restore model weights, optimizer moments and counters from a snapshot's
/// metadata file. Returns the iteration to resume at (`iteration + 1`).
///
/// Any missing, corrupt or schema-mismatched file is a hard error: startup
/// must abort rather than silently train from scratch.
pub fn load(
    meta_path: &Path,
    varmap: &mut VarMap,
    optimizer: &mut SolverOptimizer,
) -> Result<usize> {
    let state = read_state(meta_path)?;
    let dir = meta_path.parent().unwrap_or_else(|| Path::new("."));

    varmap.load(dir.join(&state.checkpoint)).map_err(|e| {
        SolverError::Load(format!("model weights {:?}: {}", state.checkpoint, e))
    })?;
    optimizer
        .load_state(dir.join(&state.optimizer_checkpoint))
        .map_err(|e| {
            SolverError::Load(format!(
                "optimizer state {:?}: {}",
                state.optimizer_checkpoint, e
            ))
        })?;
    optimizer.set_steps(state.optimizer_steps);

    Ok(state.iteration + 1)
}

/// Parse a snapshot's metadata file.
pub fn read_state(meta_path: &Path) -> Result<TrainingState> {
    let file = File::open(meta_path).map_err(|e| {
        SolverError::Load(format!("checkpoint metadata {:?}: {}", meta_path, e))
    })?;
    let state: TrainingState = serde_json::from_reader(BufReader::new(file))
        .map_err(|e| SolverError::Load(format!("checkpoint metadata {:?}: {}", meta_path, e)))?;
    Ok(state)
}
