//! Error types for log page replication.

use std::io;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while replicating a log page file.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// I/O error while writing or closing the target file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Failure reported by the chunk source.
    #[error("source error: {message}")]
    Source {
        /// Description of the source failure.
        message: String,
    },

    /// Internal accounting went out of bounds.
    #[error("invariant breach: {message}")]
    InvariantBreach {
        /// Description of the breached invariant.
        message: String,
    },
}

impl ReplicationError {
    /// Creates a source error.
    pub fn source(message: impl Into<String>) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    /// Creates an invariant breach error.
    pub fn invariant_breach(message: impl Into<String>) -> Self {
        Self::InvariantBreach {
            message: message.into(),
        }
    }
}
