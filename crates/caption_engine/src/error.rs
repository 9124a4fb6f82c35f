use std::error::Error;
use std::fmt;

/// Failure taxonomy shared by the engine and the solver.
///
/// Config and Load errors are fatal at construction/startup; Batch errors are
/// rejected by the batch assembler before they can reach loss normalization.
#[derive(Debug)]
pub enum SolverError {
    /// Invalid configuration: missing reserved vocabulary token, unsupported
    /// optimizer name.
    Config(String),
    /// Checkpoint missing, corrupt, or schema-mismatched. Startup must abort
    /// rather than silently train from scratch.
    Load(String),
    /// Degenerate batch input: empty batch or zero-length token sequence.
    Batch(String),
}

impl fmt::Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::Config(msg) => write!(f, "config error: {}", msg),
            SolverError::Load(msg) => write!(f, "checkpoint load error: {}", msg),
            SolverError::Batch(msg) => write!(f, "batch error: {}", msg),
        }
    }
}

impl Error for SolverError {}
