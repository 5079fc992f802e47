//! Error taxonomy of the harvest-and-deliver pipeline.
//!
//! Containment is decided by the caller, not by the error type: session errors
//! during a facet pass or a single item are logged and skipped, delivery errors
//! are retried, and only [`PipelineError`] ever leaves a run.

use std::time::Duration;

use thiserror::Error;

use crate::domain::batch::RunState;

/// Failures of the remote application session (browser layer).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("Interaction timed out after {timeout_ms}ms: {what}")]
    InteractionTimeout { what: String, timeout_ms: u64 },

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("Script evaluation failed: {0}")]
    Script(String),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// A single failed delivery attempt. Every variant is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Network error: {0}")]
    Transport(String),

    #[error("API Error {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("API returned success=false: {0}")]
    Unsuccessful(String),

    #[error("Malformed API response: {0}")]
    Decode(String),
}

/// Errors that abort a run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Missing credentials or API settings; raised before any remote interaction.
    #[error("Configuration error: {0}")]
    FatalConfig(String),

    /// The execution context cannot complete an interactive login step.
    #[error("Environment not supported: {0}")]
    EnvironmentUnsupported(String),

    /// `state` is the run as it stood when it aborted, FAILED entry included.
    #[error("Batch #{sequence} failed after {attempts} attempts: {source}")]
    BatchFailed {
        sequence: u32,
        attempts: u32,
        #[source]
        source: DeliveryError,
        state: Box<RunState>,
    },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub const fn is_delivery_failure(&self) -> bool {
        matches!(self, Self::BatchFailed { .. })
    }

    /// Ledger and skips of an aborted run, when the error carries them.
    pub fn run_state(&self) -> Option<&RunState> {
        match self {
            Self::BatchFailed { state, .. } => Some(&**state),
            _ => None,
        }
    }
}
