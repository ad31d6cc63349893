//! Storage error type.

use thiserror::Error;

/// Errors that can occur during storage primitive operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("refused to join path outside of root: {0}")]
    PathEscape(String),
}

/// Result type for storage primitive operations.
pub type StorageResult<T> = Result<T, StorageError>;
