//! Error types for the collection pipeline.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can end a collection run.
///
/// A field that fails to coerce (for example a non-numeric `EventID`) is not
/// an error: the field is left out of the record and the run continues.
#[derive(Error, Debug)]
pub enum Error {
    /// The query or open step failed before any output was produced.
    #[error("event source unavailable: {0}")]
    SourceUnavailable(String),

    /// The backend failed after streaming had started.
    #[error("{backend} backend failed: {detail}")]
    BackendExecutionFailed {
        backend: &'static str,
        detail: String,
    },

    /// A fragment could not be tokenized.
    #[error("malformed event fragment: {0}")]
    MalformedFragment(String),

    /// Fragment boundary pattern failed to compile.
    #[error("invalid fragment marker: {0}")]
    Pattern(#[from] regex::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn backend(backend: &'static str, detail: impl Into<String>) -> Self {
        Error::BackendExecutionFailed {
            backend,
            detail: detail.into(),
        }
    }
}
