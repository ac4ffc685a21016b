//! Dispatch statistics tracking

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Atomic dispatch statistics
#[derive(Debug, Default)]
pub struct EngineStats {
    /// Packets handed to `dispatch`
    received: AtomicU64,
    /// Packets passed to a protocol handler
    allowed: AtomicU64,
    /// Packets refused by policy
    blocked: AtomicU64,
    /// Packets that failed to parse
    dropped_malformed: AtomicU64,
    /// Packets with a protocol the engine does not handle
    dropped_unsupported: AtomicU64,
    /// New flows refused at the session cap
    dropped_session_limit: AtomicU64,
    /// Server names captured from `ClientHello`s
    tls_hostnames: AtomicU64,
    /// Sessions blocked by domain
    tls_blocked: AtomicU64,
    /// Largest packet seen
    max_packet_len: AtomicU64,
}

impl EngineStats {
    /// Create new engine statistics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received packet of `len` bytes
    pub fn record_received(&self, len: usize) {
        self.received.fetch_add(1, Ordering::Relaxed);
        self.max_packet_len
            .fetch_max(u64::try_from(len).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    pub fn record_allowed(&self) {
        self.allowed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_blocked(&self) {
        self.blocked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.dropped_malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unsupported(&self) {
        self.dropped_unsupported.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_session_limit(&self) {
        self.dropped_session_limit.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tls_hostname(&self) {
        self.tls_hostnames.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tls_blocked(&self) {
        self.tls_blocked.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of current statistics
    #[must_use]
    pub fn snapshot(&self) -> EngineStatsSnapshot {
        EngineStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            allowed: self.allowed.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            dropped_malformed: self.dropped_malformed.load(Ordering::Relaxed),
            dropped_unsupported: self.dropped_unsupported.load(Ordering::Relaxed),
            dropped_session_limit: self.dropped_session_limit.load(Ordering::Relaxed),
            tls_hostnames: self.tls_hostnames.load(Ordering::Relaxed),
            tls_blocked: self.tls_blocked.load(Ordering::Relaxed),
            max_packet_len: self.max_packet_len.load(Ordering::Relaxed),
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.received,
            &self.allowed,
            &self.blocked,
            &self.dropped_malformed,
            &self.dropped_unsupported,
            &self.dropped_session_limit,
            &self.tls_hostnames,
            &self.tls_blocked,
            &self.max_packet_len,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Snapshot of engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStatsSnapshot {
    pub received: u64,
    pub allowed: u64,
    pub blocked: u64,
    pub dropped_malformed: u64,
    pub dropped_unsupported: u64,
    pub dropped_session_limit: u64,
    pub tls_hostnames: u64,
    pub tls_blocked: u64,
    pub max_packet_len: u64,
}

impl EngineStatsSnapshot {
    /// Packets dropped for any reason
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped_malformed + self.dropped_unsupported + self.dropped_session_limit
    }
}
