//! Error types and result aliases for Arco.
//!
//! This module defines the shared error types used across the sink components.
//! Errors are structured for programmatic handling and include context for debugging.

/// The result type used throughout Arco.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Arco operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A row did not have the number of values its schema requires.
    #[error("row arity mismatch: expected {expected} values, found {actual}")]
    ArityMismatch {
        /// Number of columns declared by the schema.
        expected: usize,
        /// Number of values carried by the row.
        actual: usize,
    },

    /// A table store operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A snapshot, branch, or other object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
