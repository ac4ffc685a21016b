//! IPv4 and IPv6 network-layer parsing
//!
//! ## IPv4 header
//!
//! ```text
//!  0                   1                   2                   3
//! +-------+-------+---------------+-------------------------------+
//! |Version|  IHL  |      TOS      |          Total Length         |
//! +-------+-------+---------------+-----+-------------------------+
//! |         Identification        |Flags|     Fragment Offset     |
//! +---------------+---------------+-----+-------------------------+
//! |      TTL      |   Protocol    |        Header Checksum        |
//! +---------------+---------------+-------------------------------+
//! |                        Source Address                         |
//! |                      Destination Address                      |
//! +---------------------------------------------------------------+
//! ```
//!
//! ## IPv6 extension headers
//!
//! Each extension header starts with `{next header: u8, length: u8}`.
//! The length unit depends on the header type: 8-octet units excluding the
//! first 8 octets for most headers, 4-octet units excluding the first 8 for
//! AH, and a fixed 8 bytes for the fragment header.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tracing::{debug, trace};

use super::cursor::Cursor;
use super::error::{Layer, PacketError};
use crate::util::verify_ipv4_header;

/// IP protocol numbers
pub const IPPROTO_HOPOPTS: u8 = 0;
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ROUTING: u8 = 43;
pub const IPPROTO_FRAGMENT: u8 = 44;
pub const IPPROTO_ESP: u8 = 50;
pub const IPPROTO_AH: u8 = 51;
pub const IPPROTO_ICMPV6: u8 = 58;
pub const IPPROTO_NONE: u8 = 59;
pub const IPPROTO_DSTOPTS: u8 = 60;
pub const IPPROTO_MOBILITY: u8 = 135;

/// Minimum IPv4 header length (no options)
pub const IPV4_HEADER_LEN: usize = 20;

/// Fixed IPv6 header length
pub const IPV6_HEADER_LEN: usize = 40;

/// IPv4 more-fragments flag within the flags/offset word
const IPV4_FLAG_MF: u16 = 0x2000;

/// IPv4 fragment offset mask within the flags/offset word
const IPV4_OFFSET_MASK: u16 = 0x1FFF;

/// Upper bound on extension headers walked before giving up
const IPV6_MAX_EXT_HEADERS: usize = 16;

/// IP version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    /// Version number as carried in the header
    #[must_use]
    pub const fn number(&self) -> u8 {
        match self {
            Self::V4 => 4,
            Self::V6 => 6,
        }
    }
}

impl std::fmt::Display for IpVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}", self.number())
    }
}

/// Whether `protocol` is a transport protocol the engine handles
#[must_use]
pub const fn is_upper_layer(protocol: u8) -> bool {
    matches!(
        protocol,
        IPPROTO_TCP | IPPROTO_UDP | IPPROTO_ICMP | IPPROTO_ICMPV6
    )
}

/// IPv6 extension header kinds recognised while walking the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ipv6Extension {
    HopByHop,
    Routing,
    Fragment,
    Authentication,
    EncapsulatingSecurityPayload,
    DestinationOptions,
    Mobility,
}

impl Ipv6Extension {
    /// Classify a next-header value
    #[must_use]
    pub const fn classify(next_header: u8) -> Option<Self> {
        match next_header {
            IPPROTO_HOPOPTS => Some(Self::HopByHop),
            IPPROTO_ROUTING => Some(Self::Routing),
            IPPROTO_FRAGMENT => Some(Self::Fragment),
            IPPROTO_AH => Some(Self::Authentication),
            IPPROTO_ESP => Some(Self::EncapsulatingSecurityPayload),
            IPPROTO_DSTOPTS => Some(Self::DestinationOptions),
            IPPROTO_MOBILITY => Some(Self::Mobility),
            _ => None,
        }
    }

    /// Total header size in bytes from its length field
    ///
    /// Returns `None` for ESP, whose payload is opaque and cannot be skipped.
    #[must_use]
    pub const fn header_len(&self, length_field: u8) -> Option<usize> {
        let len = length_field as usize;
        match self {
            Self::Fragment => Some(8),
            Self::Authentication => Some((len + 2) * 4),
            Self::EncapsulatingSecurityPayload => None,
            Self::HopByHop | Self::Routing | Self::DestinationOptions | Self::Mobility => {
                Some((len + 1) * 8)
            }
        }
    }
}

/// Parsed network-layer header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    pub version: IpVersion,
    /// Upper-layer protocol number
    pub protocol: u8,
    pub source: IpAddr,
    pub destination: IpAddr,
    /// Offset of the upper-layer header from the start of the packet
    pub payload_offset: usize,
}

/// Parse and validate an IPv4 header.
///
/// # Errors
///
/// Returns `PacketError` if the packet is too short, fragmented, has an
/// inconsistent length, or (when `verify_checksum` is set) a bad checksum.
pub fn parse_ipv4(packet: &[u8], verify_checksum: bool) -> Result<IpHeader, PacketError> {
    if packet.len() < IPV4_HEADER_LEN {
        return Err(PacketError::truncated(
            Layer::Ipv4,
            IPV4_HEADER_LEN,
            packet.len(),
        ));
    }

    let mut cursor = Cursor::new(packet);
    let version_ihl = cursor.read_u8().ok_or(PacketError::Empty)?;
    let header_len = usize::from(version_ihl & 0x0F) * 4;
    let _tos = cursor.read_u8();
    let total_len = cursor
        .read_u16()
        .ok_or(PacketError::truncated(Layer::Ipv4, 4, packet.len()))?;
    let _id = cursor.read_u16();
    let flags_offset = cursor
        .read_u16()
        .ok_or(PacketError::truncated(Layer::Ipv4, 8, packet.len()))?;

    if flags_offset & IPV4_FLAG_MF != 0 {
        let offset = (flags_offset & IPV4_OFFSET_MASK) * 8;
        debug!(offset, "IPv4 fragment, dropping");
        return Err(PacketError::Fragmented { offset });
    }

    if header_len < IPV4_HEADER_LEN || header_len > packet.len() {
        return Err(PacketError::InvalidHeaderLength {
            header_len,
            packet_len: packet.len(),
        });
    }

    if usize::from(total_len) != packet.len() {
        return Err(PacketError::LengthMismatch {
            declared: usize::from(total_len),
            actual: packet.len(),
        });
    }

    if verify_checksum && !verify_ipv4_header(&packet[..header_len]) {
        return Err(PacketError::BadChecksum);
    }

    let _ttl = cursor.read_u8();
    let protocol = cursor
        .read_u8()
        .ok_or(PacketError::truncated(Layer::Ipv4, 10, packet.len()))?;
    let _checksum = cursor.read_u16();
    let source = read_ipv4_addr(&mut cursor)?;
    let destination = read_ipv4_addr(&mut cursor)?;

    Ok(IpHeader {
        version: IpVersion::V4,
        protocol,
        source: IpAddr::V4(source),
        destination: IpAddr::V4(destination),
        payload_offset: header_len,
    })
}

fn read_ipv4_addr(cursor: &mut Cursor<'_>) -> Result<Ipv4Addr, PacketError> {
    let got = cursor.position() + cursor.remaining();
    let bytes = cursor
        .take(4)
        .ok_or(PacketError::truncated(Layer::Ipv4, IPV4_HEADER_LEN, got))?;
    Ok(Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn read_ipv6_addr(cursor: &mut Cursor<'_>) -> Result<Ipv6Addr, PacketError> {
    let got = cursor.position() + cursor.remaining();
    let bytes = cursor
        .take(16)
        .ok_or(PacketError::truncated(Layer::Ipv6, IPV6_HEADER_LEN, got))?;
    let mut octets = [0u8; 16];
    octets.copy_from_slice(bytes);
    Ok(Ipv6Addr::from(octets))
}

/// Parse the fixed IPv6 header and resolve the upper-layer protocol.
///
/// No checksum is validated for IPv6.
///
/// # Errors
///
/// Returns `PacketError::Truncated` if the packet is shorter than 40 bytes.
pub fn parse_ipv6(packet: &[u8]) -> Result<IpHeader, PacketError> {
    if packet.len() < IPV6_HEADER_LEN {
        return Err(PacketError::truncated(
            Layer::Ipv6,
            IPV6_HEADER_LEN,
            packet.len(),
        ));
    }

    let mut cursor = Cursor::new(packet);
    // version/class/flow label (4), payload length (2)
    cursor
        .skip(6)
        .ok_or(PacketError::truncated(Layer::Ipv6, 6, packet.len()))?;
    let next_header = cursor
        .read_u8()
        .ok_or(PacketError::truncated(Layer::Ipv6, 7, packet.len()))?;
    let _hop_limit = cursor.read_u8();
    let source = read_ipv6_addr(&mut cursor)?;
    let destination = read_ipv6_addr(&mut cursor)?;

    let (protocol, payload_offset) = resolve_ipv6_protocol(packet, next_header);

    Ok(IpHeader {
        version: IpVersion::V6,
        protocol,
        source: IpAddr::V6(source),
        destination: IpAddr::V6(destination),
        payload_offset,
    })
}

/// Resolve the upper-layer protocol behind an IPv6 extension-header chain.
///
/// Returns `(protocol, payload_offset)`. If the chain does not end at an
/// upper-layer protocol, the fixed header's next-header value is returned with the
/// payload directly after the fixed header.
#[must_use]
pub fn resolve_ipv6_protocol(packet: &[u8], next_header: u8) -> (u8, usize) {
    if is_upper_layer(next_header) {
        return (next_header, IPV6_HEADER_LEN);
    }

    match walk_ipv6_extensions(packet, next_header) {
        Some((protocol, offset)) => (protocol, offset),
        None => {
            debug!(next_header, "IPv6 final extension, falling back");
            (next_header, IPV6_HEADER_LEN)
        }
    }
}

/// Walk the extension chain starting right after the fixed header.
///
/// Returns `Some((protocol, offset))` once an upper-layer protocol is
/// reached, or `None` if the chain is truncated, unknown, opaque (ESP,
/// no-next-header) or too long.
fn walk_ipv6_extensions(packet: &[u8], first: u8) -> Option<(u8, usize)> {
    let mut cursor = Cursor::new(packet);
    cursor.skip(IPV6_HEADER_LEN)?;
    let mut next_header = first;

    for _ in 0..IPV6_MAX_EXT_HEADERS {
        if is_upper_layer(next_header) {
            return Some((next_header, cursor.position()));
        }

        let Some(extension) = Ipv6Extension::classify(next_header) else {
            trace!(next_header, "IPv6 chain ends at non-extension header");
            return None;
        };
        trace!(?extension, offset = cursor.position(), "IPv6 extension");

        let mut header = cursor;
        let following = header.read_u8()?;
        let length_field = header.read_u8()?;
        let ext_len = extension.header_len(length_field)?;

        cursor.skip(ext_len)?;
        next_header = following;
    }

    debug!("IPv6 extension chain longer than {}", IPV6_MAX_EXT_HEADERS);
    None
}
