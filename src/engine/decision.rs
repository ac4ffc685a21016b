//! Decision inputs and dispatch outcomes

use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::packet::{IpVersion, PacketError, PacketView};
use crate::uid::UidLookup;

/// Flow summary handed to the address policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionRecord {
    pub version: IpVersion,
    pub protocol: u8,
    /// TCP flags in `SAPFR` order, empty for other protocols
    pub flags: String,
    pub source: IpAddr,
    pub source_port: u16,
    pub destination: IpAddr,
    pub destination_port: u16,
    /// Protocol detail, `"type T/C"` for ICMP
    pub data: String,
    pub uid: UidLookup,
}

impl DecisionRecord {
    #[must_use]
    pub fn from_packet(packet: &PacketView<'_>, uid: UidLookup) -> Self {
        let data = packet
            .icmp
            .map(|(icmp_type, code)| format!("type {icmp_type}/{code}"))
            .unwrap_or_default();
        let flags = if packet.is_tcp() {
            packet.tcp_flags.summary()
        } else {
            String::new()
        };

        Self {
            version: packet.version,
            protocol: packet.protocol,
            flags,
            source: packet.source,
            source_port: packet.source_port,
            destination: packet.destination,
            destination_port: packet.destination_port,
            data,
            uid,
        }
    }
}

/// Redirect target returned by an allowing policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Redirect {
    pub address: Option<IpAddr>,
    pub port: u16,
}

impl Redirect {
    /// Allow without redirecting
    #[must_use]
    pub const fn none() -> Self {
        Self {
            address: None,
            port: 0,
        }
    }

    #[must_use]
    pub const fn to(address: IpAddr, port: u16) -> Self {
        Self {
            address: Some(address),
            port,
        }
    }

    /// Only a redirect with both an address and a non-zero port takes effect
    #[must_use]
    pub const fn is_effective(&self) -> bool {
        self.address.is_some() && self.port != 0
    }

    /// `Some(self)` if effective
    #[must_use]
    pub const fn effective(self) -> Option<Self> {
        if self.is_effective() {
            Some(self)
        } else {
            None
        }
    }
}

/// Why a packet was dropped before reaching a handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// Packet failed to parse
    Malformed(PacketError),
    /// Protocol other than TCP, UDP, ICMP or ICMPv6
    UnsupportedProtocol(u8),
    /// New flow refused at the session cap
    SessionLimit { open: usize, max: usize },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "malformed: {e}"),
            Self::UnsupportedProtocol(p) => write!(f, "unsupported protocol {p}"),
            Self::SessionLimit { open, max } => write!(f, "{open} of max {max} sessions"),
        }
    }
}

/// Result of dispatching one packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Dropped without calling any collaborator
    Dropped(DropReason),
    /// Passed to the protocol handler
    Allowed {
        protocol: u8,
        redirect: Option<Redirect>,
    },
    /// Refused by policy
    Blocked { protocol: u8 },
}

impl DispatchOutcome {
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    #[must_use]
    pub const fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped(_))
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dropped(reason) => write!(f, "dropped ({reason})"),
            Self::Allowed {
                protocol,
                redirect: Some(Redirect {
                    address: Some(addr),
                    port,
                }),
            } => write!(f, "allowed p{protocol} -> {addr}/{port}"),
            Self::Allowed { protocol, .. } => write!(f, "allowed p{protocol}"),
            Self::Blocked { protocol } => write!(f, "blocked p{protocol}"),
        }
    }
}
