//! Configuration loading and management
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "TUNGUARD_LOG_LEVEL";

/// Environment variable overriding `engine.max_sessions`
pub const ENV_MAX_SESSIONS: &str = "TUNGUARD_MAX_SESSIONS";

/// Environment variable overriding `uid_cache.proc_net_root`
pub const ENV_PROC_NET_ROOT: &str = "TUNGUARD_PROC_NET_ROOT";

/// Load configuration from a JSON file
///
/// # Arguments
///
/// * `path` - Path to the configuration file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read or parsed.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        max_sessions = config.engine.max_sessions,
        uid_ttl_ms = config.uid_cache.ttl_ms,
        "Configuration loaded"
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// Environment variables:
/// - `TUNGUARD_LOG_LEVEL`: Override log level
/// - `TUNGUARD_MAX_SESSIONS`: Override the session cap
/// - `TUNGUARD_PROC_NET_ROOT`: Override the connection table directory
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing or an override fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let config = load_config(path)?;
    apply_env_overrides(config, |name| std::env::var(name).ok())
}

/// Apply overrides read through `lookup`, then re-validate
///
/// # Errors
///
/// Returns `ConfigError::EnvError` for unparsable values and
/// `ConfigError::ValidationError` if the result is invalid.
pub fn apply_env_overrides(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    if let Some(max) = lookup(ENV_MAX_SESSIONS) {
        config.engine.max_sessions = max.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_MAX_SESSIONS.into(),
            reason: format!("Invalid number: {max}"),
        })?;
        debug!("Max sessions overridden to {}", config.engine.max_sessions);
    }

    if let Some(root) = lookup(ENV_PROC_NET_ROOT) {
        config.uid_cache.proc_net_root = root.into();
        debug!(
            "Connection table root overridden to {:?}",
            config.uid_cache.proc_net_root
        );
    }

    // Re-validate after overrides
    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
