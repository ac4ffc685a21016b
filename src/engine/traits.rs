//! Collaborator seams
//!
//! The engine decides; everything with state outside one packet lives
//! behind these traits and is supplied by the host.

use crate::packet::PacketView;
use crate::uid::{FlowQuery, UidLookup};

use super::decision::{DecisionRecord, Redirect};

/// Attributes a flow to the uid owning its local socket
pub trait OwnerResolver: Send + Sync {
    fn resolve_owner(&self, query: &FlowQuery) -> UidLookup;

    /// Forget cached state on engine shutdown
    fn reset(&self) {}
}

/// Address and domain policy store
pub trait PolicyOracle: Send + Sync {
    /// `None` blocks the flow. `Some` allows it, redirecting if the
    /// returned target is effective.
    fn is_address_allowed(&self, record: &DecisionRecord) -> Option<Redirect>;

    fn is_domain_blocked(&self, hostname: &str, uid: UidLookup) -> bool;
}

/// Open-session lookup
pub trait SessionTable: Send + Sync {
    fn has_existing_session(&self, protocol: u8, packet: &PacketView<'_>) -> bool;
}

/// Data-plane forwarders for allowed traffic
pub trait ProtocolHandlers: Send + Sync {
    fn handle_icmp(&self, packet: &PacketView<'_>, uid: UidLookup);

    fn handle_udp(&self, packet: &PacketView<'_>, uid: UidLookup, redirect: Option<&Redirect>);

    fn handle_tcp(&self, packet: &PacketView<'_>, uid: UidLookup, redirect: Option<&Redirect>);

    /// Tear down or mark a UDP flow the policy refused
    fn block_udp(&self, packet: &PacketView<'_>, uid: UidLookup);
}
