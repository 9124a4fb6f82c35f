//! Training pipeline: CLI arguments, checkpoint persistence, the per-batch
//! step engine, and the epoch/iteration loop.

pub mod args;
pub mod checkpoint;
pub mod step;
pub mod training_loop;

pub use args::TrainArgs;
pub use checkpoint::TrainingState;
pub use step::train_step;
pub use training_loop::Solver;
