//! Error types for tunguard
//!
//! Packet-level problems never surface here: malformed input is reported
//! through [`crate::engine::DispatchOutcome`] and the packet is dropped.
//! These types cover startup and configuration failures.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Top-level error type for tunguard
#[derive(Debug, Error)]
pub enum TunguardError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel readiness probe errors
    #[error("Probe error: {0}")]
    Probe(#[from] ProbeError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl TunguardError {
    /// Check if this error is recoverable (can retry operation)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(e) => e.is_recoverable(),
            Self::Probe(e) => e.is_recoverable(),
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors are generally not recoverable without user intervention
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        false
    }
}

/// Tunnel readiness probe errors
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Tunnel descriptor never became readable
    #[error("Tunnel not readable after {}ms", elapsed.as_millis())]
    Timeout { elapsed: Duration, probes_sent: u64 },

    /// `poll(2)` failed with something other than `EINTR`
    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    /// Probe socket could not be created
    #[error("Failed to create probe socket: {0}")]
    Socket(#[source] io::Error),
}

impl ProbeError {
    /// A timeout may succeed on a later attempt once the tunnel is up
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Create a timeout error
    pub const fn timeout(elapsed: Duration, probes_sent: u64) -> Self {
        Self::Timeout {
            elapsed,
            probes_sent,
        }
    }
}

/// Type alias for Result with `TunguardError`
pub type Result<T> = std::result::Result<T, TunguardError>;
