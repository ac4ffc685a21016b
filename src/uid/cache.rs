//! TTL cache over the kernel connection tables
//!
//! Entries are appended as tables are scanned and never removed
//! individually; an entry older than the TTL is ignored by lookups and its
//! slot is reused by the next scan.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::net::Ipv6Addr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use super::proc_net::{parse_line, ConnEntry, ConnTable, ConnTableError};
use super::{FlowQuery, UidLookup};
use crate::config::UidCacheConfig;
use crate::packet::IpVersion;

/// IPv4-mapped unspecified address `::ffff:0.0.0.0`
const MAPPED_UNSPECIFIED: Ipv6Addr = Ipv6Addr::new(0, 0, 0, 0, 0, 0xffff, 0, 0);

/// Whether an address read from a `version` table is the any-address wildcard.
///
/// IPv4 tables are stored mapped, so their `0.0.0.0` is `::ffff:0.0.0.0`.
/// In IPv6 tables only `::` is a wildcard.
fn is_wildcard(version: IpVersion, addr: &Ipv6Addr) -> bool {
    match version {
        IpVersion::V4 => *addr == MAPPED_UNSPECIFIED,
        IpVersion::V6 => addr.is_unspecified(),
    }
}

/// Cached connection-table line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidCacheEntry {
    pub version: IpVersion,
    pub protocol: u8,
    pub source: Ipv6Addr,
    pub source_port: u16,
    pub destination: Ipv6Addr,
    pub destination_port: u16,
    pub uid: u32,
    pub inserted_at: Instant,
}

impl UidCacheEntry {
    fn from_conn(version: IpVersion, protocol: u8, conn: &ConnEntry, now: Instant) -> Self {
        Self {
            version,
            protocol,
            source: conn.local,
            source_port: conn.local_port,
            destination: conn.remote,
            destination_port: conn.remote_port,
            uid: conn.uid,
            inserted_at: now,
        }
    }

    /// Whether the entry is still within `ttl` at `now`
    #[must_use]
    pub fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) <= ttl
    }
}

/// Lookup key normalised to the table being searched
#[derive(Debug, Clone, Copy)]
struct TableKey {
    version: IpVersion,
    protocol: u8,
    source: Ipv6Addr,
    source_port: u16,
    destination: Ipv6Addr,
    destination_port: u16,
}

impl TableKey {
    /// Socket match: wildcard addresses and destination port 0 match anything
    fn matches(
        &self,
        source: &Ipv6Addr,
        source_port: u16,
        destination: &Ipv6Addr,
        destination_port: u16,
    ) -> bool {
        source_port == self.source_port
            && (destination_port == self.destination_port || destination_port == 0)
            && (*source == self.source || is_wildcard(self.version, source))
            && (*destination == self.destination || is_wildcard(self.version, destination))
    }

    fn matches_entry(&self, entry: &UidCacheEntry) -> bool {
        entry.version == self.version
            && entry.protocol == self.protocol
            && self.matches(
                &entry.source,
                entry.source_port,
                &entry.destination,
                entry.destination_port,
            )
    }

    fn matches_conn(&self, conn: &ConnEntry) -> bool {
        self.matches(
            &conn.local,
            conn.local_port,
            &conn.remote,
            conn.remote_port,
        )
    }
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UidCacheStats {
    /// Lookups answered from the cache
    pub hits: u64,
    /// Lookups that needed a table
    pub misses: u64,
    /// Tables read
    pub scans: u64,
    /// Slots currently allocated (fresh or expired)
    pub entries: usize,
}

/// Owner-uid cache backed by `/proc/net` connection tables
#[derive(Debug)]
pub struct UidCache {
    entries: Vec<UidCacheEntry>,
    ttl: Duration,
    proc_net_root: PathBuf,
    stats: UidCacheStats,
}

impl UidCache {
    /// Create an empty cache reading tables from `proc_net_root`
    pub fn new(ttl: Duration, proc_net_root: impl Into<PathBuf>) -> Self {
        Self {
            entries: Vec::new(),
            ttl,
            proc_net_root: proc_net_root.into(),
            stats: UidCacheStats::default(),
        }
    }

    /// Create a cache from configuration
    #[must_use]
    pub fn from_config(config: &UidCacheConfig) -> Self {
        Self::new(
            Duration::from_millis(config.ttl_ms),
            config.proc_net_root.clone(),
        )
    }

    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    #[must_use]
    pub fn proc_net_root(&self) -> &Path {
        &self.proc_net_root
    }

    #[must_use]
    pub fn stats(&self) -> UidCacheStats {
        UidCacheStats {
            entries: self.entries.len(),
            ..self.stats
        }
    }

    /// Drop every entry and release the storage
    pub fn reset(&mut self) {
        debug!(entries = self.entries.len(), "Resetting uid cache");
        self.entries = Vec::new();
    }

    /// Resolve the uid owning `query`
    pub fn resolve(&mut self, query: &FlowQuery) -> UidLookup {
        self.resolve_at(query, Instant::now())
    }

    /// Resolve the uid owning `query` as of `now`.
    ///
    /// IPv4 flows are looked up as IPv4-mapped addresses in the v6 tables
    /// first, since dual-stack sockets only appear there, and fall back to
    /// the v4 tables when nothing matched.
    pub fn resolve_at(&mut self, query: &FlowQuery, now: Instant) -> UidLookup {
        let mut key = TableKey {
            version: IpVersion::V6,
            protocol: query.protocol,
            source: query.mapped_source(),
            source_port: query.source_port,
            destination: query.mapped_destination(),
            destination_port: query.destination_port,
        };

        let mut result = UidLookup::NotFound;
        if query.version == IpVersion::V4 {
            result = self.lookup(&key, now);
            debug!(
                source = %query.source,
                sport = query.source_port,
                destination = %query.destination,
                dport = query.destination_port,
                protocol = query.protocol,
                uid = result.sentinel(),
                "uid as inet6"
            );
        }

        if result == UidLookup::NotFound {
            key.version = query.version;
            result = self.lookup(&key, now);
        }

        match result {
            UidLookup::Resolved(uid) => info!(
                source = %query.source,
                sport = query.source_port,
                destination = %query.destination,
                dport = query.destination_port,
                protocol = query.protocol,
                uid,
                "uid resolved"
            ),
            UidLookup::NotFound => warn!(
                source = %query.source,
                sport = query.source_port,
                destination = %query.destination,
                dport = query.destination_port,
                protocol = query.protocol,
                "uid not found"
            ),
            UidLookup::Unavailable | UidLookup::NotLooked => {}
        }
        result
    }

    fn lookup(&mut self, key: &TableKey, now: Instant) -> UidLookup {
        let ttl = self.ttl;
        if let Some(uid) = self
            .entries
            .iter()
            .find(|e| e.is_fresh(now, ttl) && key.matches_entry(e))
            .map(|e| e.uid)
        {
            self.stats.hits += 1;
            debug!(uid, version = %key.version, "uid from cache");
            return UidLookup::Resolved(uid);
        }
        self.stats.misses += 1;

        let Some(table) = ConnTable::select(key.version, key.protocol) else {
            return UidLookup::NotFound;
        };

        match self.scan(table, key, now) {
            Ok(Some(uid)) => UidLookup::Resolved(uid),
            Ok(None) => UidLookup::NotFound,
            Err(e) => {
                error!(error = %e, "Connection table scan failed");
                UidLookup::Unavailable
            }
        }
    }

    /// Read `table`, caching every line and returning the last match
    fn scan(
        &mut self,
        table: ConnTable,
        key: &TableKey,
        now: Instant,
    ) -> Result<Option<u32>, ConnTableError> {
        let path = self.proc_net_root.join(table.file_name());
        let file = File::open(&path).map_err(|source| ConnTableError::Open {
            path: path.clone(),
            source,
        })?;
        self.stats.scans += 1;
        trace!(path = %path.display(), "Scanning connection table");

        let mut found = None;
        let mut reuse_from = 0;
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| ConnTableError::Read {
                path: path.clone(),
                source,
            })?;
            if index == 0 {
                continue;
            }

            let conn = parse_line(&line, table.version(), index + 1)?;
            if key.matches_conn(&conn) {
                found = Some(conn.uid);
            }
            let entry = UidCacheEntry::from_conn(table.version(), key.protocol, &conn, now);
            self.insert(entry, &mut reuse_from, now);
        }

        Ok(found)
    }

    /// Store `entry` in the first expired slot at or after `reuse_from`,
    /// appending when none is left
    fn insert(&mut self, entry: UidCacheEntry, reuse_from: &mut usize, now: Instant) {
        while *reuse_from < self.entries.len() && self.entries[*reuse_from].is_fresh(now, self.ttl)
        {
            *reuse_from += 1;
        }

        if let Some(slot) = self.entries.get_mut(*reuse_from) {
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }
}
