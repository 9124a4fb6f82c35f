//! Caption Solver
//!
//! Training/evaluation orchestrator for attention-based caption generation:
//! - batcher: variable-length batches packed into timestep-major form
//! - train: per-step engine, checkpointing, and the epoch/iteration loop
//! - evaluate: decoding passes over validation/test splits
//! - optim: Adam/RMSprop with checkpointable moment state
//!
//! The neural model itself is supplied by the host application through the
//! `caption_engine::CaptionModel` contract.

pub mod batcher;
pub mod config;
pub mod evaluate;
pub mod logging;
pub mod optim;
pub mod train;

pub use batcher::{pack_batch, EvalExample, RawExample, SortedBatch};
pub use config::SolverConfig;
pub use optim::{OptimizerKind, SolverOptimizer};
pub use train::training_loop::Solver;
