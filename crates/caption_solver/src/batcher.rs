//! Batch assembly: variable-length caption batches packed timestep-major.

use anyhow::Result;
use candle_core::{Device, Tensor};

use caption_engine::SolverError;

/// One training example as produced by the dataset pipeline.
#[derive(Debug, Clone)]
pub struct RawExample {
    /// Feature tensor for one image, e.g. `[L, D]`. Shape must be uniform
    /// across a batch.
    pub feature: Tensor,
    /// Token-id sequence including `<START>` and `<END>`.
    pub tokens: Vec<u32>,
    /// Reference caption text.
    pub caption: String,
    pub image_id: i64,
}

/// One evaluation example: features plus the id the generated caption is
/// reported under.
#[derive(Debug, Clone)]
pub struct EvalExample {
    pub feature: Tensor,
    pub image_id: i64,
}

/// A mini-batch sorted by descending sequence length with the token
/// sequences packed timestep-major.
///
/// `step_sizes[t]` is the number of examples still active at timestep `t`;
/// it is non-increasing and `step_sizes[0]` equals the batch size. `tokens`
/// holds, for each timestep in order, the t-th token of every active example
/// in the batch's sorted order, so `tokens.len() == step_sizes.iter().sum()`.
#[derive(Debug)]
pub struct SortedBatch {
    pub features: Tensor,
    pub tokens: Vec<u32>,
    pub step_sizes: Vec<usize>,
    /// Per-example lengths as an `[B, 1]` f32 column, for the coverage
    /// regularizer's `seq_len / L` target.
    pub seq_lens: Tensor,
    pub captions: Vec<String>,
}

impl SortedBatch {
    pub fn batch_size(&self) -> usize {
        self.step_sizes.first().copied().unwrap_or(0)
    }

    pub fn max_len(&self) -> usize {
        self.step_sizes.len()
    }

    /// Packed-buffer offset of timestep `t`.
    pub fn step_offset(&self, t: usize) -> usize {
        self.step_sizes[..t].iter().sum()
    }
}

/// Assemble one `SortedBatch` from raw examples.
///
/// Examples are stably sorted by descending token length (ties keep their
/// original relative order), features and captions reordered to match, and
/// the token sequences packed first-by-timestep-then-by-example. Features and
/// lengths are placed on `device`; an empty batch or a zero-length sequence
/// is rejected here so loss normalization downstream never divides by zero.
pub fn pack_batch(examples: &[&RawExample], device: &Device) -> Result<SortedBatch> {
    if examples.is_empty() {
        return Err(SolverError::Batch("empty batch".to_string()).into());
    }
    if let Some(ex) = examples.iter().find(|ex| ex.tokens.is_empty()) {
        return Err(SolverError::Batch(format!(
            "zero-length token sequence for image {}",
            ex.image_id
        ))
        .into());
    }

    let mut order: Vec<usize> = (0..examples.len()).collect();
    order.sort_by_key(|&i| std::cmp::Reverse(examples[i].tokens.len()));

    let features: Vec<Tensor> = order.iter().map(|&i| examples[i].feature.clone()).collect();
    let features = Tensor::stack(&features, 0)?.to_device(device)?;
    let captions: Vec<String> = order.iter().map(|&i| examples[i].caption.clone()).collect();
    let lens: Vec<f32> = order.iter().map(|&i| examples[i].tokens.len() as f32).collect();
    let seq_lens = Tensor::from_vec(lens, (examples.len(), 1), device)?;

    let max_len = examples[order[0]].tokens.len();
    let mut tokens = Vec::with_capacity(order.iter().map(|&i| examples[i].tokens.len()).sum());
    let mut step_sizes = Vec::with_capacity(max_len);
    for t in 0..max_len {
        let mut active = 0;
        for &i in &order {
            if let Some(&tok) = examples[i].tokens.get(t) {
                tokens.push(tok);
                active += 1;
            }
        }
        step_sizes.push(active);
    }

    Ok(SortedBatch {
        features,
        tokens,
        step_sizes,
        seq_lens,
        captions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn example(image_id: i64, tokens: &[u32]) -> RawExample {
        let feature = Tensor::full(image_id as f32, (2, 3), &Device::Cpu).unwrap();
        RawExample {
            feature,
            tokens: tokens.to_vec(),
            caption: format!("ref {}", image_id),
            image_id,
        }
    }

    #[test]
    fn sorts_by_descending_length_with_stable_ties() -> Result<()> {
        let a = example(10, &[1, 3, 2]);
        let b = example(11, &[1, 3, 4, 2]);
        let c = example(12, &[1, 4, 2]);
        let batch = pack_batch(&[&a, &b, &c], &Device::Cpu)?;

        // b first, then a and c keeping their original relative order.
        assert_eq!(batch.captions, vec!["ref 11", "ref 10", "ref 12"]);
        let first_feature = batch.features.narrow(0, 0, 1)?.flatten_all()?.to_vec1::<f32>()?;
        assert!(first_feature.iter().all(|&v| v == 11.0));
        assert_eq!(batch.seq_lens.flatten_all()?.to_vec1::<f32>()?, vec![4.0, 3.0, 3.0]);
        Ok(())
    }

    #[test]
    fn step_sizes_are_non_increasing_and_start_at_batch_size() -> Result<()> {
        let a = example(0, &[1, 3, 4, 2]);
        let b = example(1, &[1, 3, 2]);
        let c = example(2, &[1, 2]);
        let batch = pack_batch(&[&a, &b, &c], &Device::Cpu)?;

        assert_eq!(batch.step_sizes, vec![3, 3, 2, 1]);
        assert_eq!(batch.step_sizes[0], batch.batch_size());
        for pair in batch.step_sizes.windows(2) {
            assert!(pair[0] >= pair[1]);
        }
        assert_eq!(batch.tokens.len(), batch.step_sizes.iter().sum::<usize>());
        Ok(())
    }

    #[test]
    fn packs_tokens_timestep_major() -> Result<()> {
        let a = example(0, &[1, 3, 4, 2]);
        let b = example(1, &[1, 3, 2]);
        let batch = pack_batch(&[&a, &b], &Device::Cpu)?;

        // t0: [1, 1], t1: [3, 3], t2: [4, 2], t3: [2]
        assert_eq!(batch.step_sizes, vec![2, 2, 2, 1]);
        assert_eq!(batch.tokens, vec![1, 1, 3, 3, 4, 2, 2]);
        assert_eq!(batch.step_offset(2), 4);
        Ok(())
    }

    #[test]
    fn equal_lengths_keep_every_step_full() -> Result<()> {
        let a = example(0, &[1, 3, 2]);
        let b = example(1, &[1, 4, 2]);
        let batch = pack_batch(&[&a, &b], &Device::Cpu)?;

        assert_eq!(batch.step_sizes, vec![2, 2, 2]);
        assert_eq!(batch.max_len(), 3);
        Ok(())
    }

    #[test]
    fn rejects_empty_and_degenerate_input() {
        let err = pack_batch(&[], &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("empty batch"));

        let a = example(7, &[]);
        let err = pack_batch(&[&a], &Device::Cpu).unwrap_err();
        assert!(err.to_string().contains("zero-length"));
    }
}
