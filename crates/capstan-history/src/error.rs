//! Error taxonomy for the state rebuilder

use thiserror::Error;

/// Message used when an event slice comes in empty
pub const ERR_HISTORY_SIZE_ZERO: &str = "encounter history size being zero";

/// Errors from applying events to mutable state
///
/// A failed replicate or generate step poisons the mutable state: the caller
/// must discard it rather than persist a partially applied fold.
#[derive(Debug, Error)]
pub enum StateError {
    /// Malformed request or unknown event type; non-retryable
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Unexpected internal condition; fatal for the fold
    #[error("internal error: {0}")]
    Internal(String),

    /// Namespace lookup failed
    #[error("namespace not found: {0}")]
    NamespaceNotFound(String),
}

impl StateError {
    /// Internal error for an empty event slice
    pub fn history_size_zero() -> Self {
        Self::Internal(ERR_HISTORY_SIZE_ZERO.to_string())
    }

    /// Invalid-argument error naming an event type the builder cannot apply
    pub fn unknown_event_type(event_type: impl std::fmt::Display) -> Self {
        Self::InvalidArgument(format!("unknown event type: {event_type}"))
    }
}
