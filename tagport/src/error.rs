//! Error types for the tagport engine.

use std::io;
use thiserror::Error;

/// Errors surfaced by worker, endpoint, and listener operations.
///
/// Submission-level errors (malformed arguments, closed handles) surface
/// synchronously from `send`/`recv`; in-flight failures surface as the
/// completion result delivered to the suspended caller. No error is
/// silently swallowed: a worker-fatal transport error completes every
/// pending operation with [`TagError::TransportError`] rather than
/// leaving them hung.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    /// Underlying network failure. Fatal to the operation, not to the
    /// worker (the worker remains usable for cleanup calls).
    #[error("transport error: {message}")]
    TransportError {
        /// Details about the underlying failure.
        message: String,
    },

    /// Peer or local closure observed mid-operation.
    #[error("connection closed")]
    ConnectionClosed,

    /// Operation explicitly cancelled via endpoint or worker closure.
    #[error("operation cancelled")]
    Cancelled,

    /// The worker's tag space is exhausted.
    #[error("tag space exhausted")]
    Exhausted,

    /// The listener could not bind the requested port.
    #[error("bind failure on {addr}: {message}")]
    BindFailure {
        /// The address that could not be bound.
        addr: String,
        /// Details about the bind failure.
        message: String,
    },

    /// Malformed arguments rejected at submission time.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong with the arguments.
        message: String,
    },
}

impl TagError {
    /// Build a [`TagError::TransportError`] from any displayable cause.
    pub(crate) fn transport(cause: impl std::fmt::Display) -> Self {
        TagError::TransportError {
            message: cause.to_string(),
        }
    }
}

impl From<io::Error> for TagError {
    fn from(error: io::Error) -> Self {
        TagError::transport(error)
    }
}

/// Result type for tagport operations.
pub type TagResult<T> = Result<T, TagError>;
