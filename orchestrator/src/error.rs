use std::{fmt, io};

use machine_learning::MlErr;

/// All errors that can occur in the orchestrator.
#[derive(Debug)]
pub enum OrchestratorError {
    /// Invalid configuration, caught before training starts.
    InvalidConfig(String),
    /// A checkpoint could not be written or read back.
    Checkpoint(String),
    /// The data source failed or produced malformed batches.
    Data(String),
    /// The model rejected an operation.
    Ml(MlErr),
    /// A training step failed, wrapping the underlying error.
    Step {
        epoch: usize,
        step: usize,
        source: Box<OrchestratorError>,
    },
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Checkpoint(msg) => write!(f, "checkpoint error: {msg}"),
            Self::Data(msg) => write!(f, "data error: {msg}"),
            Self::Ml(e) => write!(f, "model error: {e}"),
            Self::Step {
                epoch,
                step,
                source,
            } => write!(f, "step {step} of epoch {epoch} failed: {source}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for OrchestratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Ml(e) => Some(e),
            Self::Step { source, .. } => Some(source.as_ref()),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for OrchestratorError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<MlErr> for OrchestratorError {
    fn from(e: MlErr) -> Self {
        Self::Ml(e)
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
