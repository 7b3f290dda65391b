//! Error types for simdex.
//!
//! A single error enum covers configuration, I/O and serialization failures
//! as well as the four kinds the index service reports to its callers:
//! validation, embedding, persistence and partial rebuild failures.

use thiserror::Error;

/// Unified error type for simdex.
///
/// All functions in the workspace return `Result<T, AppError>`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O and filesystem errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid caller input: missing record fields, empty query, bad id
    #[error("Validation error: {0}")]
    Validation(String),

    /// Embedding provider unreachable, timed out or returned garbage
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Snapshot store unreadable or unwritable
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// One or more corpus records could not be re-embedded during a rebuild
    #[error("Rebuild skipped {} record(s): {}", .skipped.len(), .skipped.join(", "))]
    RebuildPartialFailure { skipped: Vec<String> },

    /// Generic errors
    #[error("{0}")]
    Other(String),
}

/// The kinds of failure visible at the index service boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Embedding,
    Persistence,
    RebuildPartialFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Embedding => "embedding",
            ErrorKind::Persistence => "persistence",
            ErrorKind::RebuildPartialFailure => "rebuild_partial_failure",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    /// Classify this error into one of the service boundary kinds.
    ///
    /// Storage-flavoured failures (I/O, serialization, anything unclassified)
    /// count as persistence failures; configuration problems are the caller's
    /// to fix and count as validation failures.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation(_) | AppError::Config(_) => ErrorKind::Validation,
            AppError::Embedding(_) => ErrorKind::Embedding,
            AppError::RebuildPartialFailure { .. } => ErrorKind::RebuildPartialFailure,
            AppError::Persistence(_)
            | AppError::Io(_)
            | AppError::Serialization(_)
            | AppError::Other(_) => ErrorKind::Persistence,
        }
    }

    /// Fold this error into one of the four boundary variants.
    pub fn into_boundary(self) -> Self {
        match self {
            AppError::Config(msg) => AppError::Validation(msg),
            AppError::Io(e) => AppError::Persistence(e.to_string()),
            AppError::Serialization(msg) | AppError::Other(msg) => AppError::Persistence(msg),
            other => other,
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
