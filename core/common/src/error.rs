//! Common error types for Rox.

use thiserror::Error;

/// Top-level error type for Rox operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The snapshot source failed to produce a snapshot.
    #[error("Fetch failed: {message}")]
    Fetch {
        message: String,
        /// Whether repeating the fetch may succeed.
        retryable: bool,
    },

    /// The fetch did not complete within the configured timeout.
    #[error("Fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The fetch was cancelled before the cycle reached diffing.
    #[error("Refresh cancelled")]
    Cancelled,

    /// Key fields are empty or do not resolve to fields of the record type.
    #[error("Missing key configuration: {0}")]
    MissingKeyConfiguration(String),

    /// No factory was supplied for creating records.
    #[error("Missing factory: {0}")]
    MissingFactory(String),

    /// No snapshot source was supplied.
    #[error("Missing snapshot source")]
    MissingSource,

    /// A refresh cycle is already running against this collection.
    #[error("Refresh cycle already in progress ({0})")]
    CycleInProgress(String),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a fetch error that is worth retrying.
    pub fn transient(message: impl Into<String>) -> Self {
        Error::Fetch {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a fetch error that will not go away on retry.
    pub fn fetch(message: impl Into<String>) -> Self {
        Error::Fetch {
            message: message.into(),
            retryable: false,
        }
    }

    /// Check if the failed operation may succeed when repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Fetch {
                retryable: true,
                ..
            } | Error::Timeout(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
