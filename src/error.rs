//! Error types for the readmission pipeline
//!
//! Every variant is fatal to the current pipeline run. Messages carry the
//! offending column or the underlying error text so a failed run can be
//! diagnosed without re-running it.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Pipeline error types
#[derive(Error, Debug)]
pub enum Error {
    /// Required column missing, or a value that cannot be interpreted
    #[error("Schema error in column '{column}': {reason}")]
    Schema {
        /// Offending column (comma-separated when several are missing)
        column: String,
        /// What was wrong with it
        reason: String,
    },

    /// Data source unreachable/malformed, or invalid pipeline configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model fitting failed (e.g. single-class labels)
    #[error("Training error: {0}")]
    Training(String),

    /// Any failure talking to the tracking/registry store, including run close
    #[error("Tracking store error: {0}")]
    TrackingStore(String),

    /// Storage error (Parquet/Arrow/CSV)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build a [`Error::Schema`] for one column.
    pub fn schema(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Schema {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Wrap any displayable failure as a tracking store error.
    pub fn tracking(context: &str, err: impl std::fmt::Display) -> Self {
        Self::TrackingStore(format!("{context}: {err}"))
    }
}
