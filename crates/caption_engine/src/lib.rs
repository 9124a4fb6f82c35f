//! Caption Engine
//!
//! Collaborator contracts and shared types for the caption training solver:
//! - CaptionModel: per-timestep attention model interface
//! - CaptionDecoder / BeamSearchDecoder: sequence generation at evaluation time
//! - CaptionScorer: corpus-level scoring over a persisted candidate file
//! - Vocabulary: word/id mapping with the reserved control tokens

pub mod decode;
pub mod device_utils;
pub mod error;
pub mod model;
pub mod scorer;
pub mod vocab;

pub use decode::{BeamSearchDecoder, CaptionDecoder};
pub use error::SolverError;
pub use model::CaptionModel;
pub use scorer::CaptionScorer;
pub use vocab::Vocabulary;
