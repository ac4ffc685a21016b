//! Kernel connection-table parsing
//!
//! `/proc/net/{tcp,tcp6,udp,udp6,icmp,icmp6}` list one socket per line:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid ...
//!    0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000 ...
//! ```
//!
//! Addresses are printed as 32-bit words in host byte order, so each word
//! is converted to network order after decoding.

use std::io;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::PathBuf;

use thiserror::Error;

use crate::packet::{IpVersion, IPPROTO_ICMP, IPPROTO_ICMPV6, IPPROTO_TCP, IPPROTO_UDP};
use crate::util::hex::{hex_to_array, HexError};

/// Column holding `local_address:port`
const LOCAL_COLUMN: usize = 1;
/// Column holding `rem_address:port`
const REMOTE_COLUMN: usize = 2;
/// Column holding the owning uid
const UID_COLUMN: usize = 7;

/// Connection table errors
#[derive(Debug, Error)]
pub enum ConnTableError {
    /// Table could not be opened
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Read failed part way through the table
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Line is missing a required column
    #[error("line {line}: missing column {column}")]
    MissingColumn { line: usize, column: usize },

    /// `addr:port` field is not split by a colon
    #[error("line {line}: malformed endpoint {field:?}")]
    MalformedEndpoint { line: usize, field: String },

    /// Address has the wrong width for the table's IP version
    #[error("line {line}: address {field:?} is not {expected} hex characters")]
    AddressWidth {
        line: usize,
        field: String,
        expected: usize,
    },

    /// Address is not valid hex
    #[error("line {line}: {source}")]
    AddressHex {
        line: usize,
        #[source]
        source: HexError,
    },

    /// Port or uid is not a valid number
    #[error("line {line}: invalid number {field:?}")]
    InvalidNumber { line: usize, field: String },
}

/// One of the kernel connection tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnTable {
    Tcp,
    Tcp6,
    Udp,
    Udp6,
    Icmp,
    Icmp6,
}

impl ConnTable {
    /// Table listing sockets of `protocol` for `version`
    ///
    /// ICMP only has a v4 table and ICMPv6 only a v6 one; any other
    /// combination has no table.
    #[must_use]
    pub const fn select(version: IpVersion, protocol: u8) -> Option<Self> {
        match (version, protocol) {
            (IpVersion::V4, IPPROTO_ICMP) => Some(Self::Icmp),
            (IpVersion::V6, IPPROTO_ICMPV6) => Some(Self::Icmp6),
            (IpVersion::V4, IPPROTO_TCP) => Some(Self::Tcp),
            (IpVersion::V6, IPPROTO_TCP) => Some(Self::Tcp6),
            (IpVersion::V4, IPPROTO_UDP) => Some(Self::Udp),
            (IpVersion::V6, IPPROTO_UDP) => Some(Self::Udp6),
            _ => None,
        }
    }

    /// File name under the proc root
    #[must_use]
    pub const fn file_name(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Tcp6 => "tcp6",
            Self::Udp => "udp",
            Self::Udp6 => "udp6",
            Self::Icmp => "icmp",
            Self::Icmp6 => "icmp6",
        }
    }

    #[must_use]
    pub const fn version(&self) -> IpVersion {
        match self {
            Self::Tcp | Self::Udp | Self::Icmp => IpVersion::V4,
            Self::Tcp6 | Self::Udp6 | Self::Icmp6 => IpVersion::V6,
        }
    }
}

/// One parsed socket line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnEntry {
    /// Local address, IPv4 tables stored as IPv4-mapped
    pub local: Ipv6Addr,
    pub local_port: u16,
    pub remote: Ipv6Addr,
    pub remote_port: u16,
    pub uid: u32,
}

/// Parse one table line. `line` is the 1-based line number for errors.
///
/// # Errors
///
/// Returns `ConnTableError` if a column is missing or malformed.
pub fn parse_line(text: &str, version: IpVersion, line: usize) -> Result<ConnEntry, ConnTableError> {
    let columns: Vec<&str> = text.split_whitespace().collect();
    let column = |index: usize| {
        columns
            .get(index)
            .copied()
            .ok_or(ConnTableError::MissingColumn {
                line,
                column: index,
            })
    };

    let (local, local_port) = parse_endpoint(column(LOCAL_COLUMN)?, version, line)?;
    let (remote, remote_port) = parse_endpoint(column(REMOTE_COLUMN)?, version, line)?;
    let uid_field = column(UID_COLUMN)?;
    let uid = uid_field
        .parse::<u32>()
        .map_err(|_| ConnTableError::InvalidNumber {
            line,
            field: uid_field.to_string(),
        })?;

    Ok(ConnEntry {
        local,
        local_port,
        remote,
        remote_port,
        uid,
    })
}

fn parse_endpoint(
    field: &str,
    version: IpVersion,
    line: usize,
) -> Result<(Ipv6Addr, u16), ConnTableError> {
    let (addr_hex, port_hex) =
        field
            .split_once(':')
            .ok_or_else(|| ConnTableError::MalformedEndpoint {
                line,
                field: field.to_string(),
            })?;

    let port = u16::from_str_radix(port_hex, 16).map_err(|_| ConnTableError::InvalidNumber {
        line,
        field: port_hex.to_string(),
    })?;

    let expected = match version {
        IpVersion::V4 => 8,
        IpVersion::V6 => 32,
    };
    if addr_hex.len() != expected {
        return Err(ConnTableError::AddressWidth {
            line,
            field: addr_hex.to_string(),
            expected,
        });
    }

    let addr = match version {
        IpVersion::V4 => {
            let raw: [u8; 4] = hex_to_array(addr_hex)
                .map_err(|source| ConnTableError::AddressHex { line, source })?;
            Ipv4Addr::from(host_words_to_network(raw)).to_ipv6_mapped()
        }
        IpVersion::V6 => {
            let raw: [u8; 16] = hex_to_array(addr_hex)
                .map_err(|source| ConnTableError::AddressHex { line, source })?;
            Ipv6Addr::from(host_words_to_network(raw))
        }
    };

    Ok((addr, port))
}

/// Reorder each 32-bit word from host to network byte order
fn host_words_to_network<const N: usize>(mut raw: [u8; N]) -> [u8; N] {
    for word in raw.chunks_exact_mut(4) {
        let value = u32::from_ne_bytes([word[0], word[1], word[2], word[3]]);
        word.copy_from_slice(&value.to_be_bytes());
    }
    raw
}
