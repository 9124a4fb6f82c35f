use candle_core::{Result, Tensor, D};
use candle_nn::ops::log_softmax;

use crate::model::CaptionModel;

/// Sequence-generation collaborator used by the evaluation loop.
///
/// Input is a stacked feature batch `[B, ...]`; output is one generated id
/// sequence per example, in batch order.
pub trait CaptionDecoder {
    fn decode(&self, model: &dyn CaptionModel, features: &Tensor) -> Result<Vec<Vec<u32>>>;
}

/// Width-limited beam search over the `CaptionModel` step interface.
///
/// Hypotheses are scored by summed log-probability; a hypothesis retires when
/// it emits `<END>` and the search stops once `beam_size` hypotheses have
/// retired or `max_steps` tokens were generated. Tie-breaks are resolved by
/// enumeration order, so decoding is deterministic for frozen weights.
pub struct BeamSearchDecoder {
    beam_size: usize,
    start: u32,
    end: u32,
    max_steps: usize,
}

struct Hypothesis {
    tokens: Vec<u32>,
    score: f32,
}

impl BeamSearchDecoder {
    pub fn new(beam_size: usize, start: u32, end: u32, max_steps: usize) -> Self {
        Self {
            beam_size: beam_size.max(1),
            start,
            end,
            max_steps,
        }
    }

    fn decode_one(&self, model: &dyn CaptionModel, features: &Tensor) -> Result<Vec<u32>> {
        let device = features.device();
        let normed = model.normalize_features(features)?;
        let projected = model.project_features(&normed)?;
        let (mut hidden, mut cell) = model.initial_state(&normed)?;

        let mut active = vec![Hypothesis {
            tokens: vec![self.start],
            score: 0.0,
        }];
        let mut finished: Vec<Hypothesis> = Vec::new();

        for _ in 0..self.max_steps {
            if active.is_empty() || finished.len() >= self.beam_size {
                break;
            }
            let width = active.len();
            let feats = self.tile(&normed, width)?;
            let projs = self.tile(&projected, width)?;
            let last: Vec<u32> = active
                .iter()
                .map(|h| h.tokens.last().copied().unwrap_or(self.start))
                .collect();
            let tokens = Tensor::from_vec(last, (width,), device)?;

            let (logits, _alpha, (next_hidden, next_cell)) =
                model.step(&feats, &projs, &tokens, &hidden, &cell)?;
            let log_probs = log_softmax(&logits, D::Minus1)?.to_vec2::<f32>()?;

            // Expand every active hypothesis by every token, keep the best
            // beam_size continuations overall.
            let mut candidates: Vec<(f32, usize, u32)> = Vec::new();
            for (row, probs) in log_probs.iter().enumerate() {
                for (tok, lp) in probs.iter().enumerate() {
                    candidates.push((active[row].score + lp, row, tok as u32));
                }
            }
            candidates.sort_by(|a, b| {
                b.0.partial_cmp(&a.0)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(a.1.cmp(&b.1))
                    .then(a.2.cmp(&b.2))
            });

            let mut next_active: Vec<Hypothesis> = Vec::new();
            let mut keep_rows: Vec<u32> = Vec::new();
            for (score, row, tok) in candidates {
                if next_active.len() >= self.beam_size {
                    break;
                }
                let mut tokens = active[row].tokens.clone();
                tokens.push(tok);
                if tok == self.end {
                    finished.push(Hypothesis { tokens, score });
                } else {
                    next_active.push(Hypothesis { tokens, score });
                    keep_rows.push(row as u32);
                }
            }

            if next_active.is_empty() {
                active = next_active;
                break;
            }
            let rows = Tensor::from_vec(keep_rows, (next_active.len(),), device)?;
            hidden = next_hidden.index_select(&rows, 0)?;
            cell = next_cell.index_select(&rows, 0)?;
            active = next_active;
        }

        // Unterminated hypotheses still compete when nothing retired in time.
        finished.extend(active);
        let best = finished
            .into_iter()
            .max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .map(|h| h.tokens)
            .unwrap_or_else(|| vec![self.start]);
        Ok(best)
    }

    /// Repeat a single-example tensor along the batch dimension.
    fn tile(&self, tensor: &Tensor, count: usize) -> Result<Tensor> {
        if count == 1 {
            return Ok(tensor.clone());
        }
        let mut dims = vec![count];
        dims.extend(std::iter::repeat(1).take(tensor.rank().saturating_sub(1)));
        tensor.repeat(dims)
    }
}

impl CaptionDecoder for BeamSearchDecoder {
    fn decode(&self, model: &dyn CaptionModel, features: &Tensor) -> Result<Vec<Vec<u32>>> {
        let batch = features.dim(0)?;
        let mut sequences = Vec::with_capacity(batch);
        for b in 0..batch {
            let row = features.narrow(0, b, 1)?;
            sequences.push(self.decode_one(model, &row)?);
        }
        Ok(sequences)
    }
}
