//! Owning-application attribution
//!
//! Maps a flow's 5-tuple to the uid that owns the local socket by reading
//! the kernel connection tables, with a TTL cache in front so a burst of
//! new flows does not re-read `/proc/net` for every packet.
//!
//! # Example
//!
//! ```no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use tunguard::config::UidCacheConfig;
//! use tunguard::packet::{IpVersion, IPPROTO_TCP};
//! use tunguard::uid::{FlowQuery, UidResolver};
//! use tunguard::engine::OwnerResolver;
//!
//! let resolver = UidResolver::new(&UidCacheConfig::default());
//! let query = FlowQuery {
//!     version: IpVersion::V4,
//!     protocol: IPPROTO_TCP,
//!     source: IpAddr::V4(Ipv4Addr::new(10, 1, 10, 1)),
//!     source_port: 40000,
//!     destination: IpAddr::V4(Ipv4Addr::new(93, 184, 216, 34)),
//!     destination_port: 443,
//! };
//! println!("{}", resolver.resolve_owner(&query));
//! ```

pub mod cache;
pub mod proc_net;

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use parking_lot::Mutex;

pub use cache::{UidCache, UidCacheEntry, UidCacheStats};
pub use proc_net::{ConnTable, ConnTableError};

use crate::config::UidCacheConfig;
use crate::engine::OwnerResolver;
use crate::packet::{IpVersion, PacketView};

/// Flow whose owner is being looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowQuery {
    pub version: IpVersion,
    pub protocol: u8,
    pub source: IpAddr,
    pub source_port: u16,
    pub destination: IpAddr,
    pub destination_port: u16,
}

impl FlowQuery {
    /// Query for the flow carried by `packet`
    #[must_use]
    pub fn from_packet(packet: &PacketView<'_>) -> Self {
        Self {
            version: packet.version,
            protocol: packet.protocol,
            source: packet.source,
            source_port: packet.source_port,
            destination: packet.destination,
            destination_port: packet.destination_port,
        }
    }

    /// Source address, IPv4 in mapped form
    #[must_use]
    pub fn mapped_source(&self) -> Ipv6Addr {
        to_mapped(self.source)
    }

    /// Destination address, IPv4 in mapped form
    #[must_use]
    pub fn mapped_destination(&self) -> Ipv6Addr {
        to_mapped(self.destination)
    }
}

fn to_mapped(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Result of an owner lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UidLookup {
    /// Owning uid
    Resolved(u32),
    /// No socket matched
    NotFound,
    /// Connection table could not be read or parsed
    Unavailable,
    /// Packet did not need attribution
    NotLooked,
}

impl UidLookup {
    /// Integer form used by host bridges: the uid, -1 when unknown, -2 on
    /// table failure
    #[must_use]
    pub fn sentinel(&self) -> i64 {
        match self {
            Self::Resolved(uid) => i64::from(*uid),
            Self::NotFound | Self::NotLooked => -1,
            Self::Unavailable => -2,
        }
    }

    /// The uid, if resolved
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        match self {
            Self::Resolved(uid) => Some(*uid),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_root(&self) -> bool {
        matches!(self, Self::Resolved(0))
    }
}

impl fmt::Display for UidLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolved(uid) => write!(f, "{uid}"),
            Self::NotFound => f.write_str("not found"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::NotLooked => f.write_str("-"),
        }
    }
}

/// Thread-safe [`OwnerResolver`] over a [`UidCache`]
#[derive(Debug)]
pub struct UidResolver {
    cache: Mutex<UidCache>,
}

impl UidResolver {
    #[must_use]
    pub fn new(config: &UidCacheConfig) -> Self {
        Self::with_cache(UidCache::from_config(config))
    }

    #[must_use]
    pub fn with_cache(cache: UidCache) -> Self {
        Self {
            cache: Mutex::new(cache),
        }
    }

    #[must_use]
    pub fn stats(&self) -> UidCacheStats {
        self.cache.lock().stats()
    }
}

impl OwnerResolver for UidResolver {
    fn resolve_owner(&self, query: &FlowQuery) -> UidLookup {
        self.cache.lock().resolve(query)
    }

    fn reset(&self) {
        self.cache.lock().reset();
    }
}
