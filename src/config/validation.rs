use crate::config::types::{ArtifactsConfig, Config, ServerConfig, StorageConfig, WatchdogConfig};
use crate::ConfigError;

/// Validates the entire configuration.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_server_config(&config.server)?;
    validate_storage_config(&config.storage)?;
    validate_watchdog_config(&config.watchdog)?;
    validate_artifacts_config(&config.artifacts)?;
    Ok(())
}

/// Validates the HTTP server configuration.
fn validate_server_config(config: &ServerConfig) -> Result<(), ConfigError> {
    if config.bind_addr.trim().is_empty() {
        return Err(ConfigError::Validation(
            "server.bind-addr cannot be empty".to_string(),
        ));
    }

    if config.max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max-body-bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validates the storage root configuration.
fn validate_storage_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.root.trim().is_empty() {
        return Err(ConfigError::Validation(
            "storage.root cannot be empty".to_string(),
        ));
    }
    Ok(())
}

/// Validates the auto-finalize watchdog cadence.
fn validate_watchdog_config(config: &WatchdogConfig) -> Result<(), ConfigError> {
    if config.interval_ms == 0 {
        return Err(ConfigError::Validation(
            "watchdog.interval-ms must be greater than zero".to_string(),
        ));
    }

    if config.idle_ms == 0 {
        return Err(ConfigError::Validation(
            "watchdog.idle-ms must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

/// Validates artifact chunking defaults.
fn validate_artifacts_config(config: &ArtifactsConfig) -> Result<(), ConfigError> {
    if config.default_chunk_size == 0 {
        return Err(ConfigError::Validation(
            "artifacts.default-chunk-size must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
