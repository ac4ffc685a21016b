//! Configuration types for tunguard
//!
//! This module defines all configuration structures used by the firewall.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Packet dispatch settings
    #[serde(default)]
    pub engine: EngineConfig,

    /// Owner uid cache settings
    #[serde(default)]
    pub uid_cache: UidCacheConfig,

    /// Tunnel readiness probe settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        self.uid_cache.validate()?;
        self.probe.validate()?;
        self.log.validate()?;
        Ok(())
    }

    /// Create a default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Packet dispatch configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Open sessions at which new flows are refused
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Verify IPv4 header checksums (disable to trade accuracy for speed)
    #[serde(default = "default_true")]
    pub verify_ipv4_checksum: bool,

    /// Largest packet read from the tunnel
    #[serde(default = "default_mtu")]
    pub mtu: usize,
}

impl EngineConfig {
    /// Validate engine configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_sessions == 0 {
            return Err(ConfigError::ValidationError(
                "max_sessions must be greater than 0".into(),
            ));
        }

        if self.mtu < 20 {
            return Err(ConfigError::ValidationError(format!(
                "mtu {} is smaller than an IPv4 header",
                self.mtu
            )));
        }

        Ok(())
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_sessions: default_max_sessions(),
            verify_ipv4_checksum: true,
            mtu: default_mtu(),
        }
    }
}

/// Owner uid cache configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UidCacheConfig {
    /// Entry lifetime in milliseconds
    #[serde(default = "default_uid_ttl_ms")]
    pub ttl_ms: u64,

    /// Directory holding the kernel connection tables
    #[serde(default = "default_proc_net_root")]
    pub proc_net_root: PathBuf,
}

impl UidCacheConfig {
    /// Validate uid cache configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ttl_ms == 0 {
            return Err(ConfigError::ValidationError(
                "uid_cache.ttl_ms must be greater than 0".into(),
            ));
        }

        if self.proc_net_root.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "uid_cache.proc_net_root cannot be empty".into(),
            ));
        }

        Ok(())
    }

    /// Get entry lifetime as Duration
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for UidCacheConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_uid_ttl_ms(),
            proc_net_root: default_proc_net_root(),
        }
    }
}

/// Tunnel readiness probe configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Give up after this many milliseconds
    #[serde(default = "default_probe_timeout_ms")]
    pub overall_timeout_ms: u64,

    /// Poll timeout per iteration; one probe is sent each time it expires
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Smallest probe payload in bytes
    #[serde(default = "default_min_probe_size")]
    pub min_probe_size: usize,

    /// Largest probe payload in bytes
    #[serde(default = "default_max_probe_size")]
    pub max_probe_size: usize,

    /// Also send IPv6 probes
    #[serde(default)]
    pub ipv6: bool,
}

impl ProbeConfig {
    /// Validate probe configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 || self.poll_interval_ms > self.overall_timeout_ms {
            return Err(ConfigError::ValidationError(format!(
                "probe.poll_interval_ms must be in 1..={}, got {}",
                self.overall_timeout_ms, self.poll_interval_ms
            )));
        }

        if self.min_probe_size == 0 || self.min_probe_size > self.max_probe_size {
            return Err(ConfigError::ValidationError(format!(
                "invalid probe size range {}..={}",
                self.min_probe_size, self.max_probe_size
            )));
        }

        Ok(())
    }

    #[must_use]
    pub const fn overall_timeout(&self) -> Duration {
        Duration::from_millis(self.overall_timeout_ms)
    }

    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            overall_timeout_ms: default_probe_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            min_probe_size: default_min_probe_size(),
            max_probe_size: default_max_probe_size(),
            ipv6: false,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default = "default_true")]
    pub target: bool,
}

impl LogConfig {
    /// Validate logging configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(ConfigError::ValidationError(format!(
                "log.format must be \"json\" or \"pretty\", got {other:?}"
            ))),
        }
    }

    /// Whether to emit JSON lines
    #[must_use]
    pub fn is_json(&self) -> bool {
        self.format == "json"
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: true,
        }
    }
}

// Default value functions

const fn default_true() -> bool {
    true
}

const fn default_max_sessions() -> usize {
    1024
}

const fn default_mtu() -> usize {
    10000
}

const fn default_uid_ttl_ms() -> u64 {
    30_000
}

fn default_proc_net_root() -> PathBuf {
    PathBuf::from("/proc/net")
}

const fn default_probe_timeout_ms() -> u64 {
    60_000
}

const fn default_poll_interval_ms() -> u64 {
    300
}

const fn default_min_probe_size() -> usize {
    17
}

const fn default_max_probe_size() -> usize {
    213
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}
