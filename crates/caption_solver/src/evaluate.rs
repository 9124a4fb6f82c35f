//! Evaluation loop: decode a split, persist candidates, score validation.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::info;

use caption_engine::{CaptionDecoder, CaptionModel, CaptionScorer, Vocabulary};

use crate::batcher::EvalExample;
use crate::config::{Split, SolverConfig};

/// One generated caption keyed by its image id — the element type of the
/// persisted per-split JSON artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateCaption {
    pub image_id: i64,
    pub caption: String,
}

/// Accumulates generated captions over one pass of a split.
///
/// Created fresh at the start of each evaluation pass; the previous pass's
/// results never leak into the next.
#[derive(Debug, Default)]
pub struct CaptionCollector {
    captions: Vec<CandidateCaption>,
}

impl CaptionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.captions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captions.is_empty()
    }

    /// Decode one batch of evaluation examples and append the results.
    pub fn decode_batch(
        &mut self,
        model: &dyn CaptionModel,
        decoder: &dyn CaptionDecoder,
        vocab: &Vocabulary,
        examples: &[&EvalExample],
        device: &Device,
    ) -> Result<()> {
        if examples.is_empty() {
            return Ok(());
        }
        let features: Vec<Tensor> = examples.iter().map(|ex| ex.feature.clone()).collect();
        let features = Tensor::stack(&features, 0)?.to_device(device)?;

        let sequences = decoder.decode(model, &features)?;
        let texts = vocab.decode_captions(&sequences);
        for (example, caption) in examples.iter().zip(texts) {
            self.captions.push(CandidateCaption {
                image_id: example.image_id,
                caption,
            });
        }
        Ok(())
    }

    /// Persist the accumulated captions to the split's fixed artifact path
    /// and, for the validation split, score them. Test results are only
    /// persisted.
    pub fn finalize(
        self,
        config: &SolverConfig,
        split: Split,
        scorer: &dyn CaptionScorer,
    ) -> Result<Option<HashMap<String, f32>>> {
        let path = config.candidate_caption_path(split);
        write_candidates(&path, &self.captions)?;
        info!(
            "Wrote {} candidate captions for split '{}' to {:?}",
            self.captions.len(),
            split.name(),
            path
        );

        match split {
            Split::Val => {
                let scores = scorer.evaluate(&path)?;
                Ok(Some(scores))
            }
            Split::Test => Ok(None),
        }
    }
}

fn write_candidates(path: &Path, captions: &[CandidateCaption]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)
        .with_context(|| format!("failed to create candidate file {:?}", path))?;
    serde_json::to_writer(file, captions)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_artifact_roundtrips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("val").join("val.candidate.captions.json");
        let captions = vec![
            CandidateCaption {
                image_id: 17,
                caption: "a cat sat".to_string(),
            },
            CandidateCaption {
                image_id: 4,
                caption: String::new(),
            },
        ];

        write_candidates(&path, &captions)?;
        let raw = std::fs::read_to_string(&path)?;
        let parsed: Vec<CandidateCaption> = serde_json::from_str(&raw)?;
        assert_eq!(parsed, captions);
        Ok(())
    }
}
