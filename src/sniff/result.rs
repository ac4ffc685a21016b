//! Sniff result types
//!
//! This module defines the outcome of SNI extraction and the per-session
//! state that bridges a TLS handshake and the first encrypted record.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::uid::UidLookup;

/// Why a handshake record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsRejectReason {
    /// A field extends past the end of the record
    #[error("truncated handshake")]
    Truncated,

    /// Handshake message is not a `ClientHello`
    #[error("not a ClientHello")]
    NotClientHello,

    /// Declared extensions block does not fit in the record
    #[error("extensions block overruns record")]
    ExtensionsOverrun,

    /// An extension does not fit in the extensions block
    #[error("extension overruns extensions block")]
    ExtensionOverrun,

    /// Server name longer than a fully qualified domain name
    #[error("server name too long")]
    HostnameTooLong,
}

/// Result of inspecting one TCP payload for a TLS server name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum SniOutcome {
    /// `ClientHello` carried this server name
    Hostname(String),
    /// First application-data record of a session whose name is known
    ReadyToDecide,
    /// Payload does not start with a TLS record
    NotTls,
    /// SSL 2.0 or another version that cannot carry SNI
    PredatesSni,
    /// TLS record that needs no action
    NotActionable,
    /// `ClientHello` without extensions
    NoExtensions,
    /// Extensions present but no server name
    NoSni,
    /// Malformed handshake
    Rejected(TlsRejectReason),
    /// Server name is not valid UTF-8
    InvalidEncoding,
}

impl SniOutcome {
    /// The captured server name, if any
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        match self {
            Self::Hostname(name) => Some(name),
            _ => None,
        }
    }

    /// Whether parsing failed on a malformed or unusable name
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Rejected(_) | Self::InvalidEncoding)
    }
}

/// Session-level effect of [`crate::engine::FirewallEngine::inspect_tls`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", content = "hostname", rename_all = "snake_case")]
pub enum TlsVerdict {
    /// Server name stored on the session
    Captured(String),
    /// Nothing to block
    Allow,
    /// Cached server name is blocked for this uid
    Block,
}

impl TlsVerdict {
    #[must_use]
    pub const fn is_block(&self) -> bool {
        matches!(self, Self::Block)
    }
}

/// TLS state the firewall keeps per TCP session
///
/// The hostname is set at most once: the first `ClientHello` wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSession {
    hostname: Option<String>,
    /// Owner of the session's socket
    pub uid: UidLookup,
}

impl TlsSession {
    #[must_use]
    pub const fn new(uid: UidLookup) -> Self {
        Self {
            hostname: None,
            uid,
        }
    }

    /// Cached server name
    #[must_use]
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref().filter(|name| !name.is_empty())
    }

    /// Store `hostname` unless one is already cached.
    ///
    /// Returns `true` if it was stored.
    pub fn record_hostname(&mut self, hostname: impl Into<String>) -> bool {
        if self.hostname().is_some() {
            return false;
        }
        let hostname = hostname.into();
        if hostname.is_empty() {
            return false;
        }
        self.hostname = Some(hostname);
        true
    }
}

impl Default for TlsSession {
    fn default() -> Self {
        Self::new(UidLookup::NotLooked)
    }
}
