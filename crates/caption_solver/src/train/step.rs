//! The per-batch training step: length-masked teacher-forced forward pass,
//! word loss/accuracy bookkeeping, attention-coverage regularization, and one
//! optimizer update.

use anyhow::Result;
use candle_core::{DType, Tensor, D};
use candle_nn::ops::log_softmax;

use caption_engine::{CaptionModel, SolverError};

use crate::batcher::SortedBatch;
use crate::optim::SolverOptimizer;

/// Run one optimization step over a packed batch.
///
/// Walks the packed token buffer timestep by timestep, feeding each step only
/// the rows still active; rows whose sequence ended are dropped from the
/// carried state. The word loss is summed cross-entropy against the next
/// timestep's tokens with `null_id` ignored; the total (plus the optional
/// coverage penalty) is normalized by the initial batch size before the
/// backward pass.
///
/// Returns `(loss, accuracy)` where accuracy is top-1 matches over all
/// predicted positions.
pub fn train_step<M: CaptionModel>(
    model: &M,
    optimizer: &mut SolverOptimizer,
    batch: &SortedBatch,
    alpha_c: f64,
    null_id: u32,
) -> Result<(f32, f32)> {
    let device = batch.features.device();
    let batch_size = batch.batch_size();
    let steps = batch.max_len().saturating_sub(1);
    if batch_size == 0 || steps == 0 {
        return Err(SolverError::Batch(
            "batch produces no predicted positions".to_string(),
        )
        .into());
    }

    // Amortized once per batch, reused by every timestep.
    let features = model.normalize_features(&batch.features)?;
    let features_proj = model.project_features(&features)?;
    let (mut hidden, mut cell) = model.initial_state(&features)?;

    let locations = model.spatial_locations();
    let mut loss = Tensor::zeros((), DType::F32, device)?;
    let mut alpha_sum = Tensor::zeros((batch_size, locations), DType::F32, device)?;
    let mut correct = 0f32;
    let mut predicted = 0usize;

    let mut offset = 0;
    for t in 0..steps {
        let active_now = batch.step_sizes[t];
        let active_next = batch.step_sizes[t + 1];

        let step_tokens = Tensor::from_vec(
            batch.tokens[offset..offset + active_now].to_vec(),
            (active_now,),
            device,
        )?;
        let (logits, alpha, (next_hidden, next_cell)) = model.step(
            &features.narrow(0, 0, active_now)?,
            &features_proj.narrow(0, 0, active_now)?,
            &step_tokens,
            &hidden,
            &cell,
        )?;

        // Targets are the next timestep's packed tokens; only the rows still
        // active there are scored.
        let targets = Tensor::from_vec(
            batch.tokens[offset + active_now..offset + active_now + active_next].to_vec(),
            (active_next,),
            device,
        )?;

        let log_probs = log_softmax(&logits.narrow(0, 0, active_next)?, D::Minus1)?;
        let picked = log_probs
            .gather(&targets.unsqueeze(1)?, D::Minus1)?
            .squeeze(1)?
            .neg()?;
        let mask = targets.ne(null_id)?.to_dtype(DType::F32)?;
        loss = (loss + (picked * mask)?.sum_all()?)?;

        let predictions = logits.narrow(0, 0, active_next)?.argmax(D::Minus1)?;
        correct += predictions
            .eq(&targets)?
            .to_dtype(DType::F32)?
            .sum_all()?
            .to_scalar::<f32>()?;
        predicted += active_next;

        // Zero-pad the attention map up to the initial batch size: examples
        // contribute nothing to the coverage sum after they end.
        let alpha = if active_now < batch_size {
            let pad = Tensor::zeros((batch_size - active_now, locations), DType::F32, device)?;
            Tensor::cat(&[&alpha, &pad], 0)?
        } else {
            alpha
        };
        alpha_sum = (alpha_sum + alpha)?;

        hidden = next_hidden.narrow(0, 0, active_next)?;
        cell = next_cell.narrow(0, 0, active_next)?;
        offset += active_now;
    }

    if alpha_c > 0.0 {
        // Penalize squared deviation of the per-location coverage from the
        // uniform target seq_len / L.
        let target = (&batch.seq_lens * (1.0 / locations as f64))?
            .broadcast_as((batch_size, locations))?;
        let reg = ((alpha_sum - target)?.sqr()?.sum_all()? * alpha_c)?;
        loss = (loss + reg)?;
    }

    let loss = (loss / batch_size as f64)?;
    let grads = loss.backward()?;
    optimizer.step(&grads)?;

    let accuracy = correct / predicted as f32;
    Ok((loss.to_scalar::<f32>()?, accuracy))
}
