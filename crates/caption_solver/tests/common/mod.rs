//! Shared fixtures: a deterministic toy model and stub collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_nn::{Init, VarMap};

use caption_engine::{CaptionDecoder, CaptionModel, CaptionScorer, Vocabulary};
use caption_solver::batcher::{EvalExample, RawExample};

pub const VOCAB_SIZE: usize = 5;
pub const HIDDEN: usize = 4;
pub const LOCATIONS: usize = 2;
pub const FEAT_DIM: usize = 3;

pub fn toy_vocab() -> Vocabulary {
    let map: HashMap<String, u32> = [
        ("<NULL>", 0u32),
        ("<START>", 1),
        ("<END>", 2),
        ("cat", 3),
        ("sat", 4),
    ]
    .into_iter()
    .map(|(w, i)| (w.to_string(), i))
    .collect();
    Vocabulary::new(map).unwrap()
}

pub fn train_example(image_id: i64, tokens: &[u32], device: &Device) -> RawExample {
    RawExample {
        feature: Tensor::full(0.3f32, (LOCATIONS, FEAT_DIM), device).unwrap(),
        tokens: tokens.to_vec(),
        caption: format!("ref {}", image_id),
        image_id,
    }
}

pub fn eval_example(image_id: i64, device: &Device) -> EvalExample {
    EvalExample {
        feature: Tensor::full(0.3f32, (LOCATIONS, FEAT_DIM), device).unwrap(),
        image_id,
    }
}

/// Minimal recurrent captioner with constant initialization so expected
/// losses are closed-form: the output head starts at zero, making every
/// logit zero on the first step (per-token cross-entropy = ln(VOCAB_SIZE)).
pub struct TinyModel {
    pub embed: Tensor,
    pub out: Tensor,
    pub step_calls: AtomicUsize,
    pub step_widths: Mutex<Vec<usize>>,
}

pub fn tiny_model(varmap: &VarMap, device: &Device) -> CandleResult<TinyModel> {
    let embed = varmap.get(
        (VOCAB_SIZE, HIDDEN),
        "embed.weight",
        Init::Const(0.5),
        DType::F32,
        device,
    )?;
    let out = varmap.get(
        (HIDDEN, VOCAB_SIZE),
        "out.weight",
        Init::Const(0.0),
        DType::F32,
        device,
    )?;
    Ok(TinyModel {
        embed,
        out,
        step_calls: AtomicUsize::new(0),
        step_widths: Mutex::new(Vec::new()),
    })
}

impl CaptionModel for TinyModel {
    fn normalize_features(&self, features: &Tensor) -> CandleResult<Tensor> {
        Ok(features.clone())
    }

    fn project_features(&self, features: &Tensor) -> CandleResult<Tensor> {
        Ok(features.clone())
    }

    fn initial_state(&self, features: &Tensor) -> CandleResult<(Tensor, Tensor)> {
        let b = features.dim(0)?;
        let zeros = Tensor::zeros((b, HIDDEN), DType::F32, features.device())?;
        Ok((zeros.clone(), zeros))
    }

    fn step(
        &self,
        features: &Tensor,
        _features_proj: &Tensor,
        tokens: &Tensor,
        hidden: &Tensor,
        cell: &Tensor,
    ) -> CandleResult<(Tensor, Tensor, (Tensor, Tensor))> {
        let b = features.dim(0)?;
        self.step_calls.fetch_add(1, Ordering::SeqCst);
        self.step_widths.lock().unwrap().push(b);

        let emb = self.embed.index_select(tokens, 0)?;
        let next_hidden = (hidden + emb)?.tanh()?;
        let logits = next_hidden.matmul(&self.out)?;
        let alpha = (Tensor::ones((b, LOCATIONS), DType::F32, features.device())?
            * (1.0 / LOCATIONS as f64))?;
        Ok((logits, alpha, (next_hidden, cell.clone())))
    }

    fn spatial_locations(&self) -> usize {
        LOCATIONS
    }
}

/// Decoder returning a fixed sequence per example, counting invocations.
pub struct StubDecoder {
    pub calls: Arc<AtomicUsize>,
}

impl CaptionDecoder for StubDecoder {
    fn decode(&self, _model: &dyn CaptionModel, features: &Tensor) -> CandleResult<Vec<Vec<u32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let b = features.dim(0)?;
        Ok(vec![vec![1, 3, 4, 2]; b])
    }
}

/// Scorer returning a fixed metric map, counting invocations.
pub struct StubScorer {
    pub calls: Arc<AtomicUsize>,
}

impl CaptionScorer for StubScorer {
    fn evaluate(&self, _candidates: &Path) -> anyhow::Result<HashMap<String, f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok([("CIDEr".to_string(), 0.5f32)].into_iter().collect())
    }
}
