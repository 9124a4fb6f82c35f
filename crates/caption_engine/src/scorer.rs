use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;

/// Corpus-level caption scoring collaborator (CIDEr, BLEU, ...).
///
/// Consumes the persisted candidate-caption JSON artifact for a split and
/// returns one scalar per metric. The metric math itself lives behind this
/// trait; failures propagate to the evaluation caller untouched.
pub trait CaptionScorer {
    fn evaluate(&self, candidates: &Path) -> Result<HashMap<String, f32>>;
}
