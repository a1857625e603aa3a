//! Error types for the Loam engine core.

use thiserror::Error;

/// Result type for engine core operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur in engine core operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A thread attempted to release more permits than it holds.
    #[error("cannot release {released} permits: thread holds {held}")]
    PermitOverRelease {
        /// Permits held by the thread at the time of the release.
        held: usize,
        /// Permits the caller tried to return.
        released: usize,
    },

    /// A thread already holds every permit the dispatcher has.
    #[error("no more permits are available to acquire a transaction")]
    ThreadPermitsExhausted,

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Failure reported by the underlying transactional store.
    #[error("store error: {message}")]
    Store {
        /// Description of the store failure.
        message: String,
    },
}

impl EngineError {
    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates a store error.
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }
}
