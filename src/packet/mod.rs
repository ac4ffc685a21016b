//! Packet parsing
//!
//! This module turns a raw buffer read from the tunnel device into a
//! [`PacketView`]: the IP version, upper-layer protocol, addresses, ports,
//! TCP flags and payload offset the decision engine works from.
//!
//! Parsing never copies the packet and never reads past the end of the
//! buffer. Any inconsistency is reported as a [`PacketError`] and the packet
//! is dropped by the caller.

pub mod cursor;
pub mod error;
pub mod ip;
pub mod transport;

use std::net::IpAddr;

pub use cursor::Cursor;
pub use error::{Layer, PacketError};
pub use ip::{
    IpHeader, IpVersion, Ipv6Extension, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP,
};
pub use transport::{TcpFlags, TransportHeader};

/// Immutable view over one received IP packet
#[derive(Debug, Clone, Copy)]
pub struct PacketView<'a> {
    bytes: &'a [u8],
    pub version: IpVersion,
    /// Upper-layer protocol number
    pub protocol: u8,
    pub source: IpAddr,
    pub destination: IpAddr,
    pub source_port: u16,
    pub destination_port: u16,
    /// Offset of the transport header
    pub payload_offset: usize,
    pub tcp_flags: TcpFlags,
    /// ICMP type and code
    pub icmp: Option<(u8, u8)>,
    tcp_header_len: usize,
}

impl<'a> PacketView<'a> {
    /// Parse the network and transport headers of `bytes`.
    ///
    /// Protocols other than TCP, UDP, ICMP and ICMPv6 parse successfully
    /// with zero ports; the engine decides what to do with them.
    ///
    /// # Errors
    ///
    /// Returns `PacketError` when the packet is empty, not IPv4/IPv6, or
    /// any header is truncated or inconsistent.
    pub fn parse(bytes: &'a [u8], verify_ipv4_checksum: bool) -> Result<Self, PacketError> {
        let first = *bytes.first().ok_or(PacketError::Empty)?;
        let header = match first >> 4 {
            4 => ip::parse_ipv4(bytes, verify_ipv4_checksum)?,
            6 => ip::parse_ipv6(bytes)?,
            other => return Err(PacketError::UnsupportedVersion(other)),
        };

        let segment = bytes.get(header.payload_offset..).unwrap_or_default();
        let transport = transport::parse_transport(header.protocol, segment)?;

        Ok(Self {
            bytes,
            version: header.version,
            protocol: header.protocol,
            source: header.source,
            destination: header.destination,
            source_port: transport.source_port,
            destination_port: transport.destination_port,
            payload_offset: header.payload_offset,
            tcp_flags: transport.tcp_flags,
            icmp: transport.icmp,
            tcp_header_len: transport.tcp_header_len,
        })
    }

    /// The full packet
    #[must_use]
    pub const fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// Packet length in bytes
    #[must_use]
    pub const fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Transport segment (header included)
    #[must_use]
    pub fn payload(&self) -> &'a [u8] {
        self.bytes.get(self.payload_offset..).unwrap_or_default()
    }

    /// TCP application data after the header and options.
    ///
    /// Empty for non-TCP packets or when the data offset points past the
    /// end of the segment.
    #[must_use]
    pub fn tcp_payload(&self) -> &'a [u8] {
        if self.protocol != IPPROTO_TCP {
            return &[];
        }
        self.payload().get(self.tcp_header_len..).unwrap_or_default()
    }

    #[must_use]
    pub const fn is_tcp(&self) -> bool {
        self.protocol == IPPROTO_TCP
    }

    #[must_use]
    pub const fn is_udp(&self) -> bool {
        self.protocol == IPPROTO_UDP
    }

    /// ICMP or ICMPv6
    #[must_use]
    pub const fn is_icmp(&self) -> bool {
        self.protocol == IPPROTO_ICMP || self.protocol == IPPROTO_ICMPV6
    }

    /// TCP with the SYN flag set
    #[must_use]
    pub const fn is_tcp_syn(&self) -> bool {
        self.is_tcp() && self.tcp_flags.syn()
    }
}
