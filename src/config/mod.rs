//! Configuration module for the BFS crawl sink
//!
//! This module handles loading, parsing, and validating the TOML
//! configuration file that drives a sink process: the HTTP bind address,
//! the storage root, the auto-finalize watchdog cadence, and default
//! artifact encoding/chunking.
//!
//! # Example
//!
//! ```no_run
//! use bfs_crawl_sink::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("sink.toml")).unwrap();
//! println!("Binding on {}", config.server.bind_addr);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    ArtifactEncoding, ArtifactsConfig, Config, DomainOverride, RoutingConfig, ServerConfig,
    StorageConfig, WatchdogConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash};
