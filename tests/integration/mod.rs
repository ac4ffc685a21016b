//! Integration tests for tunguard
//!
//! These tests drive the public API the way an embedding VPN service
//! would: raw packets in, collaborator calls and outcomes out.
//!
//! # Test Organization
//!
//! - `pipeline`: Dispatch with real uid resolution over fake `/proc/net`
//!   tables, TLS session blocking, config loading and tunnel probing
//! - `security`: Truncated, oversized and hostile packets and TLS records
//!
//! # Running Tests
//!
//! ```bash
//! # Run all integration tests
//! cargo test --test integration_tests
//!
//! # Run specific test module
//! cargo test --test integration_tests security
//! ```

pub mod pipeline;
pub mod security;

use std::collections::HashSet;
use std::fs;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;

use parking_lot::Mutex;

use tunguard::engine::{
    DecisionRecord, PolicyOracle, ProtocolHandlers, Redirect, SessionTable,
};
use tunguard::packet::PacketView;
use tunguard::uid::UidLookup;
use tunguard::util::calc_checksum;

// ============================================================================
// Packet builders
// ============================================================================

pub const TCP: u8 = 6;
pub const UDP: u8 = 17;
pub const ICMP: u8 = 1;

pub const SYN: u8 = 0x02;
pub const ACK: u8 = 0x10;
pub const PSH: u8 = 0x08;

pub fn ipv4(protocol: u8, src: Ipv4Addr, dst: Ipv4Addr, segment: &[u8]) -> Vec<u8> {
    let total = u16::try_from(20 + segment.len()).unwrap();
    let mut packet = vec![0x45, 0x00];
    packet.extend_from_slice(&total.to_be_bytes());
    packet.extend_from_slice(&[0x12, 0x34, 0x40, 0x00, 64, protocol, 0, 0]);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    let checksum = !calc_checksum(0, &packet);
    packet[10..12].copy_from_slice(&checksum.to_be_bytes());
    packet.extend_from_slice(segment);
    packet
}

pub fn ipv6(next_header: u8, src: Ipv6Addr, dst: Ipv6Addr, rest: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x60, 0, 0, 0];
    packet.extend_from_slice(&u16::try_from(rest.len()).unwrap().to_be_bytes());
    packet.extend_from_slice(&[next_header, 64]);
    packet.extend_from_slice(&src.octets());
    packet.extend_from_slice(&dst.octets());
    packet.extend_from_slice(rest);
    packet
}

pub fn tcp(sport: u16, dport: u16, flags: u8, data: &[u8]) -> Vec<u8> {
    let mut segment = vec![0u8; 20];
    segment[0..2].copy_from_slice(&sport.to_be_bytes());
    segment[2..4].copy_from_slice(&dport.to_be_bytes());
    segment[12] = 0x50;
    segment[13] = flags;
    segment[14..16].copy_from_slice(&0xFFFFu16.to_be_bytes());
    segment.extend_from_slice(data);
    segment
}

pub fn udp(sport: u16, dport: u16, data: &[u8]) -> Vec<u8> {
    let mut segment = Vec::new();
    segment.extend_from_slice(&sport.to_be_bytes());
    segment.extend_from_slice(&dport.to_be_bytes());
    segment.extend_from_slice(&u16::try_from(8 + data.len()).unwrap().to_be_bytes());
    segment.extend_from_slice(&[0, 0]);
    segment.extend_from_slice(data);
    segment
}

pub fn icmp_echo(id: u16) -> Vec<u8> {
    let mut segment = vec![8, 0, 0, 0];
    segment.extend_from_slice(&id.to_be_bytes());
    segment.extend_from_slice(&[0, 1]);
    segment
}

// ============================================================================
// TLS builders
// ============================================================================

/// Build a TLS 1.2 record holding a `ClientHello` with the given extensions
pub fn client_hello_with(extensions: &[(u16, Vec<u8>)]) -> Vec<u8> {
    let mut ext_bytes = Vec::new();
    for (ext_type, data) in extensions {
        ext_bytes.extend_from_slice(&ext_type.to_be_bytes());
        ext_bytes.extend_from_slice(&u16::try_from(data.len()).unwrap().to_be_bytes());
        ext_bytes.extend_from_slice(data);
    }

    let mut body = vec![0x03, 0x03];
    body.extend_from_slice(&[0x42; 32]);
    body.push(0);
    body.extend_from_slice(&[0x00, 0x04, 0x13, 0x01, 0xC0, 0x2F]);
    body.extend_from_slice(&[0x01, 0x00]);
    body.extend_from_slice(&u16::try_from(ext_bytes.len()).unwrap().to_be_bytes());
    body.extend_from_slice(&ext_bytes);

    let body_len = u32::try_from(body.len()).unwrap().to_be_bytes();
    let mut handshake = vec![0x01, body_len[1], body_len[2], body_len[3]];
    handshake.extend_from_slice(&body);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&u16::try_from(handshake.len()).unwrap().to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// `server_name` extension body for one host name entry
pub fn server_name_ext(name: &[u8]) -> Vec<u8> {
    let entry_len = u16::try_from(name.len() + 3).unwrap();
    let mut data = entry_len.to_be_bytes().to_vec();
    data.push(0);
    data.extend_from_slice(&u16::try_from(name.len()).unwrap().to_be_bytes());
    data.extend_from_slice(name);
    data
}

pub fn client_hello(hostname: &str) -> Vec<u8> {
    client_hello_with(&[
        (0x000A, vec![0x00, 0x02, 0x00, 0x1D]),
        (0x0000, server_name_ext(hostname.as_bytes())),
    ])
}

pub fn application_data(len: usize) -> Vec<u8> {
    let mut record = vec![0x17, 0x03, 0x03];
    record.extend_from_slice(&u16::try_from(len).unwrap().to_be_bytes());
    record.extend(std::iter::repeat(0xA5).take(len));
    record
}

// ============================================================================
// Fake /proc/net
// ============================================================================

pub const PROC_HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

/// Render an address the way the kernel does on this host
pub fn proc_hex(octets: &[u8]) -> String {
    octets
        .chunks_exact(4)
        .map(|chunk| {
            let word = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            hex::encode_upper(word.to_ne_bytes())
        })
        .collect()
}

pub fn proc_line(local: &[u8], lport: u16, remote: &[u8], rport: u16, uid: u32) -> String {
    format!(
        "   0: {}:{lport:04X} {}:{rport:04X} 01 00000000:00000000 00:00000000 00000000 {uid:5}        0 777 1 0000000000000000 20 4 30 10 -1",
        proc_hex(local),
        proc_hex(remote),
    )
}

/// Write a connection table with a header and the given lines
pub fn write_table(root: &Path, name: &str, lines: &[String]) {
    let mut text = String::from(PROC_HEADER);
    text.push('\n');
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    fs::write(root.join(name), text).unwrap();
}

// ============================================================================
// Collaborators
// ============================================================================

/// Policy that records what it was asked
#[derive(Default)]
pub struct RecordingPolicy {
    pub records: Mutex<Vec<DecisionRecord>>,
    pub refused_ports: HashSet<u16>,
    pub redirect: Option<Redirect>,
    pub blocked_domains: HashSet<String>,
    pub domain_checks: Mutex<Vec<(String, UidLookup)>>,
}

impl RecordingPolicy {
    pub fn last_record(&self) -> Option<DecisionRecord> {
        self.records.lock().last().cloned()
    }
}

impl PolicyOracle for RecordingPolicy {
    fn is_address_allowed(&self, record: &DecisionRecord) -> Option<Redirect> {
        self.records.lock().push(record.clone());
        if self.refused_ports.contains(&record.destination_port) {
            None
        } else {
            Some(self.redirect.unwrap_or_default())
        }
    }

    fn is_domain_blocked(&self, hostname: &str, uid: UidLookup) -> bool {
        self.domain_checks.lock().push((hostname.to_string(), uid));
        self.blocked_domains.contains(hostname)
    }
}

/// Session table and handlers counting what reached the data plane
#[derive(Default)]
pub struct DataPlane {
    pub udp_flows: Mutex<HashSet<(u16, u16)>>,
    pub forwarded: Mutex<Vec<(u8, UidLookup)>>,
    pub blocked_udp: Mutex<Vec<UidLookup>>,
}

impl SessionTable for DataPlane {
    fn has_existing_session(&self, _protocol: u8, packet: &PacketView<'_>) -> bool {
        self.udp_flows
            .lock()
            .contains(&(packet.source_port, packet.destination_port))
    }
}

impl ProtocolHandlers for DataPlane {
    fn handle_icmp(&self, packet: &PacketView<'_>, uid: UidLookup) {
        self.forwarded.lock().push((packet.protocol, uid));
    }

    fn handle_udp(&self, packet: &PacketView<'_>, uid: UidLookup, _redirect: Option<&Redirect>) {
        self.udp_flows
            .lock()
            .insert((packet.source_port, packet.destination_port));
        self.forwarded.lock().push((packet.protocol, uid));
    }

    fn handle_tcp(&self, packet: &PacketView<'_>, uid: UidLookup, _redirect: Option<&Redirect>) {
        self.forwarded.lock().push((packet.protocol, uid));
    }

    fn block_udp(&self, _packet: &PacketView<'_>, uid: UidLookup) {
        self.blocked_udp.lock().push(uid);
    }
}
