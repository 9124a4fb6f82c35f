//! The event loop: epochs over the training set with periodic validation and
//! checkpointing, expressed as a plain control loop with modulo triggers.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;

use anyhow::Result;
use candle_core::Device;
use candle_nn::VarMap;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

use caption_engine::{CaptionDecoder, CaptionModel, CaptionScorer, SolverError, Vocabulary};

use crate::batcher::{pack_batch, EvalExample, RawExample};
use crate::config::{Split, SolverConfig};
use crate::evaluate::CaptionCollector;
use crate::optim::SolverOptimizer;
use crate::train::{checkpoint, step::train_step};

/// The training context: model, parameters, optimizer, collaborators and
/// configuration, owned for the lifetime of one run.
///
/// Construction creates the checkpoint/log directories, builds the optimizer
/// and consumes the resume checkpoint exactly once if one is configured; a
/// missing or corrupt checkpoint aborts construction.
pub struct Solver<M: CaptionModel> {
    model: M,
    varmap: VarMap,
    optimizer: SolverOptimizer,
    vocab: Vocabulary,
    decoder: Box<dyn CaptionDecoder>,
    scorer: Box<dyn CaptionScorer>,
    config: SolverConfig,
    device: Device,
    start_iter: usize,
}

impl<M: CaptionModel> Solver<M> {
    pub fn new(
        model: M,
        varmap: VarMap,
        vocab: Vocabulary,
        decoder: Box<dyn CaptionDecoder>,
        scorer: Box<dyn CaptionScorer>,
        config: SolverConfig,
        device: Device,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.checkpoint_dir)?;
        std::fs::create_dir_all(&config.log_dir)?;

        let mut varmap = varmap;
        let mut optimizer =
            SolverOptimizer::new(config.optimizer, &varmap, config.learning_rate)?;

        let start_iter = match &config.checkpoint {
            Some(path) => {
                info!("Resuming from checkpoint: {:?}", path);
                checkpoint::load(path, &mut varmap, &mut optimizer)?
            }
            None => 1,
        };

        Ok(Self {
            model,
            varmap,
            optimizer,
            vocab,
            decoder,
            scorer,
            config,
            device,
            start_iter,
        })
    }

    /// First iteration this run will execute (`checkpoint iteration + 1`
    /// after a resume, 1 otherwise).
    pub fn start_iteration(&self) -> usize {
        self.start_iter
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Train for the configured number of epochs, validating every
    /// `eval_every` iterations and checkpointing every `snapshot_steps`.
    pub fn train(&mut self, train_set: &[RawExample], val_set: &[EvalExample]) -> Result<()> {
        if train_set.is_empty() {
            return Err(SolverError::Batch("training set is empty".to_string()).into());
        }
        let batches_per_epoch =
            (train_set.len() + self.config.batch_size - 1) / self.config.batch_size;
        let mut iteration = self.start_iter;

        info!(
            "Starting training: {} epochs, {} batches/epoch, resuming at epoch {}, iteration {}",
            self.config.n_epochs,
            batches_per_epoch,
            self.start_iter / batches_per_epoch,
            self.start_iter
        );

        for pass in 0..self.config.n_epochs {
            // One seed per epoch: batch order is reproducible and independent
            // of how assembly is scheduled.
            let mut order: Vec<usize> = (0..train_set.len()).collect();
            let mut rng = StdRng::seed_from_u64(self.config.seed.wrapping_add(pass as u64));
            order.shuffle(&mut rng);

            for chunk in order.chunks(self.config.batch_size) {
                let examples: Vec<&RawExample> = chunk.iter().map(|&i| &train_set[i]).collect();
                let batch = pack_batch(&examples, &self.device)?;
                let (loss, accuracy) = train_step(
                    &self.model,
                    &mut self.optimizer,
                    &batch,
                    self.config.alpha_c,
                    self.vocab.null(),
                )?;

                let epoch = iteration / batches_per_epoch;
                if !loss.is_finite() {
                    warn!("Non-finite loss at iteration {}", iteration);
                }
                info!(
                    "Epoch: {}, Iteration: {}, Loss: {}, Accuracy: {}",
                    epoch, iteration, loss, accuracy
                );

                if self.config.eval_every > 0 && iteration % self.config.eval_every == 0 {
                    let scores = self.validate(val_set)?;
                    for (metric, score) in &scores {
                        info!("[Val] {}: {} (iteration {})", metric, score, iteration);
                    }
                    self.record_scores(epoch, iteration, &scores)?;
                }

                if self.config.snapshot_steps > 0 && iteration % self.config.snapshot_steps == 0 {
                    checkpoint::save(
                        &self.config.checkpoint_dir,
                        epoch,
                        iteration,
                        loss,
                        &self.varmap,
                        &self.optimizer,
                    )?;
                }

                iteration += 1;
            }
        }
        Ok(())
    }

    /// One scored pass over the validation split.
    pub fn validate(&self, val_set: &[EvalExample]) -> Result<HashMap<String, f32>> {
        let scores = self.evaluate_split(val_set, Split::Val)?;
        Ok(scores.unwrap_or_default())
    }

    /// One pass over the held-out test split; results are persisted, not
    /// scored.
    pub fn test(&self, test_set: &[EvalExample]) -> Result<()> {
        self.evaluate_split(test_set, Split::Test)?;
        Ok(())
    }

    fn evaluate_split(
        &self,
        examples: &[EvalExample],
        split: Split,
    ) -> Result<Option<HashMap<String, f32>>> {
        let mut collector = CaptionCollector::new();
        for chunk in examples.chunks(self.config.batch_size) {
            let refs: Vec<&EvalExample> = chunk.iter().collect();
            collector.decode_batch(
                &self.model,
                self.decoder.as_ref(),
                &self.vocab,
                &refs,
                &self.device,
            )?;
        }
        collector.finalize(&self.config, split, self.scorer.as_ref())
    }

    fn record_scores(
        &self,
        epoch: usize,
        iteration: usize,
        scores: &HashMap<String, f32>,
    ) -> Result<()> {
        let line = serde_json::json!({
            "epoch": epoch,
            "iteration": iteration,
            "scores": scores,
            "date": chrono::Local::now().to_rfc3339(),
        });
        let path = self.config.log_dir.join("val_scores.jsonl");
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}
