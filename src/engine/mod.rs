//! Packet dispatch and decision engine
//!
//! # Architecture
//!
//! ```text
//! tun read → FirewallEngine::dispatch()
//!               │
//!               ├── parse (PacketView) ── malformed → Dropped
//!               ├── admission control ─── at cap, new flow → Dropped
//!               ├── uid attribution (new flows only)
//!               ├── allow decision ────── PolicyOracle
//!               └── ProtocolHandlers (allowed) / block_udp (refused UDP)
//! ```
//!
//! A new flow is an ICMP packet, a UDP packet without a session, or a TCP
//! SYN. Everything else belongs to a flow that was already decided.

pub mod decision;
pub mod stats;
pub mod traits;

use std::sync::Arc;

use tracing::{debug, error, info, trace, warn};

pub use decision::{DecisionRecord, DispatchOutcome, DropReason, Redirect};
pub use stats::{EngineStats, EngineStatsSnapshot};
pub use traits::{OwnerResolver, PolicyOracle, ProtocolHandlers, SessionTable};

use crate::config::{Config, EngineConfig};
use crate::packet::PacketView;
use crate::sniff::{extract_sni, SniOutcome, TlsSession, TlsVerdict};
use crate::uid::{FlowQuery, UidLookup, UidResolver};
use crate::util::hex_dump;

/// DNS server port
const DNS_PORT: u16 = 53;

/// Longest IPv4 header; enough of a malformed packet to trace
const DUMP_LEN: usize = 60;

/// Per-packet firewall pipeline
pub struct FirewallEngine {
    config: EngineConfig,
    resolver: Arc<dyn OwnerResolver>,
    policy: Arc<dyn PolicyOracle>,
    sessions: Arc<dyn SessionTable>,
    handlers: Arc<dyn ProtocolHandlers>,
    stats: EngineStats,
}

impl std::fmt::Debug for FirewallEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallEngine")
            .field("config", &self.config)
            .field("stats", &self.stats.snapshot())
            .finish_non_exhaustive()
    }
}

impl FirewallEngine {
    /// Create an engine from explicit collaborators
    pub fn new(
        config: EngineConfig,
        resolver: Arc<dyn OwnerResolver>,
        policy: Arc<dyn PolicyOracle>,
        sessions: Arc<dyn SessionTable>,
        handlers: Arc<dyn ProtocolHandlers>,
    ) -> Self {
        Self {
            config,
            resolver,
            policy,
            sessions,
            handlers,
            stats: EngineStats::new(),
        }
    }

    /// Create an engine that attributes flows through the kernel
    /// connection tables
    pub fn from_config(
        config: &Config,
        policy: Arc<dyn PolicyOracle>,
        sessions: Arc<dyn SessionTable>,
        handlers: Arc<dyn ProtocolHandlers>,
    ) -> Self {
        let resolver = Arc::new(UidResolver::new(&config.uid_cache));
        Self::new(config.engine.clone(), resolver, policy, sessions, handlers)
    }

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Classify, attribute, decide and forward one packet.
    ///
    /// `open_sessions` is the caller's current session count. Malformed
    /// and unsupported packets are dropped without touching any
    /// collaborator.
    pub fn dispatch(&self, packet: &[u8], open_sessions: usize) -> DispatchOutcome {
        self.stats.record_received(packet.len());

        let view = match PacketView::parse(packet, self.config.verify_ipv4_checksum) {
            Ok(view) => view,
            Err(e) => {
                warn!(error = %e, len = packet.len(), "Dropping malformed packet");
                trace!(
                    bytes = %hex_dump(&packet[..packet.len().min(DUMP_LEN)]),
                    "Malformed packet head"
                );
                self.stats.record_malformed();
                return DispatchOutcome::Dropped(DropReason::Malformed(e));
            }
        };

        if !(view.is_tcp() || view.is_udp() || view.is_icmp()) {
            warn!(
                protocol = view.protocol,
                version = %view.version,
                "Unknown protocol, dropping"
            );
            self.stats.record_unsupported();
            return DispatchOutcome::Dropped(DropReason::UnsupportedProtocol(view.protocol));
        }

        let has_session = view.is_udp() && self.sessions.has_existing_session(view.protocol, &view);
        let new_flow = view.is_icmp() || (view.is_udp() && !has_session) || view.is_tcp_syn();

        let max = self.config.max_sessions;
        if new_flow && open_sessions >= max {
            error!(
                open = open_sessions,
                max,
                version = %view.version,
                protocol = view.protocol,
                "Session limit reached, dropping"
            );
            self.stats.record_session_limit();
            return DispatchOutcome::Dropped(DropReason::SessionLimit {
                open: open_sessions,
                max,
            });
        }

        let uid = if new_flow {
            self.resolver.resolve_owner(&FlowQuery::from_packet(&view))
        } else {
            UidLookup::NotLooked
        };

        info!(
            version = %view.version,
            source = %view.source,
            sport = view.source_port,
            destination = %view.destination,
            dport = view.destination_port,
            protocol = view.protocol,
            flags = %view.tcp_flags,
            uid = uid.sentinel(),
            "Packet"
        );

        let (allowed, redirect) = self.decide(&view, has_session, uid);

        if allowed {
            self.stats.record_allowed();
            if view.is_icmp() {
                self.handlers.handle_icmp(&view, uid);
            } else if view.is_udp() {
                self.handlers.handle_udp(&view, uid, redirect.as_ref());
            } else {
                self.handlers.handle_tcp(&view, uid, redirect.as_ref());
            }
            DispatchOutcome::Allowed {
                protocol: view.protocol,
                redirect,
            }
        } else {
            self.stats.record_blocked();
            if view.is_udp() {
                self.handlers.block_udp(&view, uid);
            }
            warn!(
                version = %view.version,
                protocol = view.protocol,
                destination = %view.destination,
                dport = view.destination_port,
                syn = view.is_tcp_syn(),
                "Address not allowed"
            );
            DispatchOutcome::Blocked {
                protocol: view.protocol,
            }
        }
    }

    fn decide(
        &self,
        view: &PacketView<'_>,
        has_session: bool,
        uid: UidLookup,
    ) -> (bool, Option<Redirect>) {
        // A UDP session may be lingering or already blocked; its handler decides
        if has_session {
            return (true, None);
        }

        if view.is_tcp() {
            if !view.tcp_flags.syn() {
                return (true, None);
            }
            // DNS over TCP from root (the system resolver) bypasses the
            // address policy. This is a policy choice kept from the
            // firewall's established behavior.
            if uid.is_root() && view.destination_port == DNS_PORT {
                debug!("Allowing root DNS over TCP");
                return (true, None);
            }
        }

        let record = DecisionRecord::from_packet(view, uid);
        match self.policy.is_address_allowed(&record) {
            Some(redirect) => (true, redirect.effective()),
            None => (false, None),
        }
    }

    /// Apply SNI inspection of a TCP payload to its session.
    ///
    /// A `ClientHello` hostname is cached on the session (first one wins);
    /// the first `ApplicationData` record of a session with a cached name
    /// is checked against the domain policy.
    pub fn inspect_tls(&self, payload: &[u8], session: &mut TlsSession) -> TlsVerdict {
        match extract_sni(payload, session.hostname()) {
            SniOutcome::Hostname(hostname) => {
                if session.record_hostname(hostname.as_str()) {
                    info!(%hostname, "TLS server name found");
                    self.stats.record_tls_hostname();
                    TlsVerdict::Captured(hostname)
                } else {
                    debug!(%hostname, "TLS server name already cached");
                    TlsVerdict::Allow
                }
            }
            SniOutcome::ReadyToDecide => {
                let Some(hostname) = session.hostname() else {
                    return TlsVerdict::Allow;
                };
                if self.policy.is_domain_blocked(hostname, session.uid) {
                    warn!(hostname, uid = session.uid.sentinel(), "TLS domain blocked");
                    self.stats.record_tls_blocked();
                    TlsVerdict::Block
                } else {
                    TlsVerdict::Allow
                }
            }
            outcome => {
                debug!(?outcome, "TLS server name not found");
                TlsVerdict::Allow
            }
        }
    }

    /// Release per-engine state
    pub fn shutdown(&self) {
        info!(stats = ?self.stats.snapshot(), "Firewall engine shutting down");
        self.resolver.reset();
    }
}
