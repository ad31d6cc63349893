use serde::Deserialize;
use std::collections::HashMap;

/// Artifact encoding shape, selectable per domain (see §4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactEncoding {
    /// First row merges `{_meta: true, level, kind, ...}` into the first real row.
    MetaFirstRow,
    /// Every row carries `level` and `kind` explicitly.
    Legacy,
}

impl Default for ArtifactEncoding {
    fn default() -> Self {
        ArtifactEncoding::MetaFirstRow
    }
}

/// Root configuration for the sink.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default, rename = "domain-overrides")]
    pub domain_overrides: HashMap<String, DomainOverride>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            watchdog: WatchdogConfig::default(),
            artifacts: ArtifactsConfig::default(),
            routing: RoutingConfig::default(),
            domain_overrides: HashMap::new(),
        }
    }
}

/// HTTP server binding configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(rename = "bind-addr")]
    pub bind_addr: String,

    /// Maximum accepted request body size, in bytes (default 750 MiB, §5).
    #[serde(rename = "max-body-bytes", default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

fn default_max_body_bytes() -> usize {
    750 * 1024 * 1024
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".to_string(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// On-disk layout configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Project root: parent of `BFS_crawl/` and `downloads/`.
    pub root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { root: ".".to_string() }
    }
}

/// Auto-finalize watchdog configuration (§4.7).
#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    #[serde(rename = "interval-ms", default = "default_interval_ms")]
    pub interval_ms: u64,

    #[serde(rename = "idle-ms", default = "default_idle_ms")]
    pub idle_ms: u64,
}

fn default_interval_ms() -> u64 {
    30_000
}

fn default_idle_ms() -> u64 {
    5 * 60_000
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            idle_ms: default_idle_ms(),
        }
    }
}

/// Default chunking / encoding configuration for artifacts.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    #[serde(rename = "default-chunk-size", default = "default_chunk_size")]
    pub default_chunk_size: usize,

    #[serde(default)]
    pub encoding: ArtifactEncoding,
}

fn default_chunk_size() -> usize {
    50_000
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            default_chunk_size: default_chunk_size(),
            encoding: ArtifactEncoding::default(),
        }
    }
}

/// Per-domain override of the artifact encoding / chunk size.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DomainOverride {
    pub encoding: Option<ArtifactEncoding>,
    #[serde(rename = "chunk-size")]
    pub chunk_size: Option<usize>,
}

/// Selects which compiled-in routing policy services uploads (§4.4, §4.11).
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    #[serde(default = "default_policy_name")]
    pub policy: String,
}

fn default_policy_name() -> String {
    "extension".to_string()
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            policy: default_policy_name(),
        }
    }
}
