//! Typed error hierarchy for choicelab.
//!
//! Two top-level enums cover the two subsystems:
//! - `ExperimentError`: sequencer, recorder, sampler and phase-table failures
//! - `UploadError`: dataset upload failures (configuration vs. transport)
//!
//! A failed comprehension check is not an error; it is a `GateDecision`.

use thiserror::Error;

use crate::phase::PhaseId;

/// Errors from the experiment core.
#[derive(Debug, Error)]
pub enum ExperimentError {
    /// A programming error on the caller's side, e.g. a probability outside `[0, 1]`.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A trial or response that violates the record schema.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Phase {0} is not defined in the phase table")]
    UnknownPhase(PhaseId),

    #[error("Phase {0} is terminal and has no outgoing transitions")]
    TerminalPhase(PhaseId),

    #[error("Illegal transition from {from} to {to}")]
    IllegalTransition { from: PhaseId, to: PhaseId },

    #[error("Invalid phase table: {0}")]
    InvalidPhaseTable(String),

    #[error("Response {response} is not accepted during phase {phase}")]
    UnexpectedResponse { phase: PhaseId, response: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the dataset upload adapter.
#[derive(Debug, Error)]
pub enum UploadError {
    /// Credentials or project id are missing. Not retryable.
    #[error("Upload is not configured: {0}")]
    MissingCredentials(String),

    /// The storage provider answered with a non-success status.
    #[error("Storage provider rejected the upload with status {status}: {message}")]
    Rejected { status: u16, message: String },

    /// The request never produced a response.
    #[error("Upload transport failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl UploadError {
    /// Whether retrying the same request could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UploadError::MissingCredentials(_) => false,
            UploadError::Rejected { status, .. } => *status >= 500 || *status == 429,
            UploadError::Transport(_) => true,
            UploadError::Other(_) => false,
        }
    }
}
