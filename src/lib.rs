//! tunguard: on-device tun firewall core
//!
//! This crate classifies raw IP packets read from a tun interface,
//! attributes each new flow to the uid owning its local socket, and
//! decides whether the flow may pass.
//!
//! # Features
//!
//! - **Packet parsing**: Bounds-checked IPv4/IPv6 headers with extension
//!   header walking, TCP/UDP/ICMP field extraction
//! - **Uid attribution**: TTL-cached lookups over `/proc/net` connection tables
//! - **TLS SNI**: Server name capture from `ClientHello`, enforced on the
//!   first application data record
//! - **Admission control**: New flows are refused at the session cap
//! - **Readiness probing**: Wait for the tunnel with route-activating probes
//!
//! # Architecture
//!
//! ```text
//! tun fd → FirewallEngine::dispatch → PolicyOracle → ProtocolHandlers
//!                 │
//!            UidResolver (/proc/net, 30 s TTL)
//!
//! TCP payload → FirewallEngine::inspect_tls → TlsSession hostname → block?
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use tunguard::config::load_config;
//! use tunguard::engine::{FirewallEngine, PolicyOracle, ProtocolHandlers, SessionTable};
//!
//! # fn example(
//! #     policy: Arc<dyn PolicyOracle>,
//! #     sessions: Arc<dyn SessionTable>,
//! #     handlers: Arc<dyn ProtocolHandlers>,
//! #     packet: &[u8],
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/tunguard/config.json")?;
//! let engine = FirewallEngine::from_config(&config, policy, sessions, handlers);
//!
//! let outcome = engine.dispatch(packet, 0);
//! println!("{outcome}");
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`engine`]: Dispatch, admission control and decisions
//! - [`error`]: Error types
//! - [`packet`]: IP and transport header parsing
//! - [`probe`]: Tunnel readiness probing
//! - [`sniff`]: TLS SNI extraction
//! - [`uid`]: Socket owner resolution
//! - [`util`]: Checksums, sequence numbers, UTF-8 and hex helpers

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod engine;
pub mod error;
pub mod packet;
pub mod probe;
pub mod sniff;
pub mod uid;
pub mod util;

// Re-export commonly used types at the crate root
pub use config::{Config, EngineConfig, ProbeConfig, UidCacheConfig};
pub use engine::{
    DecisionRecord, DispatchOutcome, DropReason, FirewallEngine, PolicyOracle, ProtocolHandlers,
    Redirect, SessionTable,
};
pub use error::{ConfigError, ProbeError, TunguardError};
pub use packet::{PacketError, PacketView};
pub use probe::{wait_for_tunnel_up, ProbeReport, ProbeSink, UdpProbeSink};
pub use sniff::{extract_sni, SniOutcome, TlsSession, TlsVerdict};
pub use uid::{FlowQuery, UidLookup, UidResolver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
