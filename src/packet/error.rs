//! Packet parsing errors
//!
//! Every variant describes a malformed or unsupported packet. They are
//! never fatal: the dispatcher logs the error and drops the packet.

use std::fmt;

use thiserror::Error;

/// Header layer a length check applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Layer {
    Ipv4,
    Ipv6,
    Icmp,
    Udp,
    Tcp,
}

impl Layer {
    /// Layer name for log output
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Ipv4 => "IPv4",
            Self::Ipv6 => "IPv6",
            Self::Icmp => "ICMP",
            Self::Udp => "UDP",
            Self::Tcp => "TCP",
        }
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Malformed packet reasons
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    /// Zero-length read
    #[error("empty packet")]
    Empty,

    /// IP version other than 4 or 6
    #[error("unknown IP version {0}")]
    UnsupportedVersion(u8),

    /// Buffer shorter than the header it claims to carry
    #[error("{layer} packet too short: {got} < {need}")]
    Truncated { layer: Layer, need: usize, got: usize },

    /// IPv4 packet with the more-fragments flag set
    #[error("IPv4 fragment at offset {offset}")]
    Fragmented { offset: u16 },

    /// IHL smaller than the fixed header or larger than the buffer
    #[error("invalid IPv4 header length {header_len} for packet of {packet_len} bytes")]
    InvalidHeaderLength { header_len: usize, packet_len: usize },

    /// IPv4 total-length field disagrees with the number of bytes read
    #[error("invalid length {actual}, header length {declared}")]
    LengthMismatch { declared: usize, actual: usize },

    /// IPv4 header checksum does not verify
    #[error("invalid IPv4 header checksum")]
    BadChecksum,
}

impl PacketError {
    /// Create a truncation error
    #[must_use]
    pub const fn truncated(layer: Layer, need: usize, got: usize) -> Self {
        Self::Truncated { layer, need, got }
    }
}
