//! Transport-layer field extraction (TCP, UDP, ICMP, ICMPv6)

use std::fmt;

use super::cursor::Cursor;
use super::error::{Layer, PacketError};
use super::ip::{IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};

/// Minimum ICMP/ICMPv6 header length
pub const ICMP_HEADER_LEN: usize = 8;

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// Minimum TCP header length (no options)
pub const TCP_HEADER_LEN: usize = 20;

/// TCP control flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TcpFlags(u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;

    /// Wrap the raw flags byte (offset 13 of the TCP header)
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    #[must_use]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    #[must_use]
    pub const fn syn(&self) -> bool {
        self.0 & Self::SYN != 0
    }

    #[must_use]
    pub const fn ack(&self) -> bool {
        self.0 & Self::ACK != 0
    }

    #[must_use]
    pub const fn psh(&self) -> bool {
        self.0 & Self::PSH != 0
    }

    #[must_use]
    pub const fn fin(&self) -> bool {
        self.0 & Self::FIN != 0
    }

    #[must_use]
    pub const fn rst(&self) -> bool {
        self.0 & Self::RST != 0
    }

    /// Compact summary in `SAPFR` order, e.g. `"SA"` for SYN+ACK
    #[must_use]
    pub fn summary(&self) -> String {
        [
            (self.syn(), 'S'),
            (self.ack(), 'A'),
            (self.psh(), 'P'),
            (self.fin(), 'F'),
            (self.rst(), 'R'),
        ]
        .iter()
        .filter(|(set, _)| *set)
        .map(|(_, c)| *c)
        .collect()
    }
}

impl fmt::Display for TcpFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Fields extracted from the transport header
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransportHeader {
    pub source_port: u16,
    pub destination_port: u16,
    pub tcp_flags: TcpFlags,
    /// TCP header length from the data offset, zero for other protocols
    pub tcp_header_len: usize,
    /// ICMP type and code
    pub icmp: Option<(u8, u8)>,
}

/// Extract ports, flags and ICMP type/code from the segment at the start of `segment`.
///
/// ICMP has no ports, so its identifier is reported as both source and
/// destination port.
///
/// # Errors
///
/// Returns `PacketError::Truncated` if `segment` is shorter than the
/// protocol's minimum header.
pub fn parse_transport(protocol: u8, segment: &[u8]) -> Result<TransportHeader, PacketError> {
    match protocol {
        IPPROTO_ICMP | IPPROTO_ICMPV6 => parse_icmp(segment),
        IPPROTO_UDP => parse_udp(segment),
        IPPROTO_TCP => parse_tcp(segment),
        _ => Ok(TransportHeader::default()),
    }
}

fn require(layer: Layer, need: usize, segment: &[u8]) -> Result<(), PacketError> {
    if segment.len() < need {
        return Err(PacketError::truncated(layer, need, segment.len()));
    }
    Ok(())
}

fn parse_icmp(segment: &[u8]) -> Result<TransportHeader, PacketError> {
    require(Layer::Icmp, ICMP_HEADER_LEN, segment)?;
    let short = || PacketError::truncated(Layer::Icmp, ICMP_HEADER_LEN, segment.len());

    let mut cursor = Cursor::new(segment);
    let icmp_type = cursor.read_u8().ok_or_else(short)?;
    let code = cursor.read_u8().ok_or_else(short)?;
    cursor.skip(2).ok_or_else(short)?; // checksum
    let id = cursor.read_u16().ok_or_else(short)?;

    Ok(TransportHeader {
        source_port: id,
        destination_port: id,
        icmp: Some((icmp_type, code)),
        ..TransportHeader::default()
    })
}

fn parse_udp(segment: &[u8]) -> Result<TransportHeader, PacketError> {
    require(Layer::Udp, UDP_HEADER_LEN, segment)?;
    let short = || PacketError::truncated(Layer::Udp, UDP_HEADER_LEN, segment.len());

    let mut cursor = Cursor::new(segment);
    let source_port = cursor.read_u16().ok_or_else(short)?;
    let destination_port = cursor.read_u16().ok_or_else(short)?;

    Ok(TransportHeader {
        source_port,
        destination_port,
        ..TransportHeader::default()
    })
}

fn parse_tcp(segment: &[u8]) -> Result<TransportHeader, PacketError> {
    require(Layer::Tcp, TCP_HEADER_LEN, segment)?;
    let short = || PacketError::truncated(Layer::Tcp, TCP_HEADER_LEN, segment.len());

    let mut cursor = Cursor::new(segment);
    let source_port = cursor.read_u16().ok_or_else(short)?;
    let destination_port = cursor.read_u16().ok_or_else(short)?;
    cursor.skip(8).ok_or_else(short)?; // seq, ack
    let data_offset = cursor.read_u8().ok_or_else(short)?;
    let flags = cursor.read_u8().ok_or_else(short)?;

    Ok(TransportHeader {
        source_port,
        destination_port,
        tcp_flags: TcpFlags::from_bits(flags),
        tcp_header_len: usize::from(data_offset >> 4) * 4,
        icmp: None,
    })
}
