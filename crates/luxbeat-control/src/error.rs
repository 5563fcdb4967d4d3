//! Error types for the control layer
use thiserror::Error;

/// A failed command delivery reported by a fixture adapter.
///
/// Dispatch failures are isolated per fixture: the scheduler retries and
/// eventually degrades the one fixture, they never cross component
/// boundaries.
#[derive(Debug, Clone, Error)]
#[error("dispatch failed: {0}")]
pub struct DispatchError(pub String);

impl DispatchError {
    /// Build a dispatch error from anything printable
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Control layer errors
#[derive(Debug, Error)]
pub enum ControlError {
    /// A sync protocol message failed to parse or validate
    #[error("invalid sync message: {0}")]
    InvalidMessage(String),

    /// Referenced fixture is not known to the scheduler
    #[error("unknown fixture: {0}")]
    UnknownFixture(String),

    /// Referenced effect is not configured
    #[error("unknown effect: {0}")]
    UnknownEffect(String),

    /// Core engine error (config mismatch, analysis fault, bad parameter)
    #[error(transparent)]
    Core(#[from] luxbeat_core::CoreError),

    /// JSON decoding error from the sync wire
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Command delivery failure
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Result type for control operations
pub type Result<T> = std::result::Result<T, ControlError>;
