//! BFS crawl coordination sink
//!
//! This crate is the local coordination and storage service ("sink") for a
//! semi-automatic breadth-first web crawl. An external HTTP client performs
//! all outbound network I/O (fetching pages and files); this crate accepts
//! streams of discovered URLs and downloaded bytes, maintains per-domain
//! crawl state across many partial runs, deduplicates content by hash,
//! routes artifacts into a deterministic directory layout, and repairs
//! on-disk placement when routing rules evolve.

pub mod artifacts;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod frontier;
pub mod http;
pub mod probe;
pub mod resort;
pub mod routing;
pub mod runs;
pub mod state;
pub mod storage;
pub mod upload;
pub mod url;

use thiserror::Error;

/// Main error type for sink operations.
///
/// Variants mirror the error taxonomy of the specification: validation
/// failures surface as 4xx, everything else as 5xx. HTTP handlers convert
/// these into the `{ok: false, error}` JSON envelope (see `http::respond`).
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("routing could not resolve a bucket for {url}")]
    RoutingUnresolved { url: String },

    #[error("PDF integrity check failed for {url}: {note}")]
    PdfIntegrity { url: String, note: &'static str },

    #[error("reconciliation exhausted {max} dup-suffix slots for {path}")]
    ConflictUnresolvable { path: String, max: u32 },

    #[error("filesystem operation failed transiently: {0}")]
    FilesystemTransient(String),

    #[error("failed to hash file on disk: {path}: {source}")]
    DiskHashFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Configuration-specific errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias for sink operations.
pub type Result<T> = std::result::Result<T, SinkError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::Coordinator;
pub use domain::DomainKey;
