//! Security tests for tunguard
//!
//! Every byte handed to the engine comes from an untrusted app or peer.
//! These tests feed truncated, inconsistent and random input through the
//! packet parser and the SNI extractor.
//!
//! # Test Categories
//!
//! - `test_input_validation_*`: Malformed headers are dropped with no side effects
//! - `test_boundary_*`: Length fields at and past their limits
//! - `test_fuzz_*`: Seeded random input never panics

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tunguard::engine::{DispatchOutcome, DropReason, FirewallEngine, OwnerResolver};
use tunguard::packet::{PacketError, PacketView};
use tunguard::sniff::{extract_sni, SniOutcome, TlsRejectReason, TlsSession, TlsVerdict};
use tunguard::uid::{FlowQuery, UidLookup};
use tunguard::EngineConfig;

use super::*;

const SRC: Ipv4Addr = Ipv4Addr::new(10, 1, 10, 1);
const DST: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);

/// Resolver that never touches the filesystem
struct FixedOwner(UidLookup);

impl OwnerResolver for FixedOwner {
    fn resolve_owner(&self, _query: &FlowQuery) -> UidLookup {
        self.0
    }
}

fn engine() -> (FirewallEngine, Arc<RecordingPolicy>, Arc<DataPlane>) {
    let policy = Arc::new(RecordingPolicy::default());
    let plane = Arc::new(DataPlane::default());
    let engine = FirewallEngine::new(
        EngineConfig::default(),
        Arc::new(FixedOwner(UidLookup::Resolved(10_001))),
        policy.clone(),
        plane.clone(),
        plane.clone(),
    );
    (engine, policy, plane)
}

fn assert_untouched(policy: &RecordingPolicy, plane: &DataPlane) {
    assert!(policy.records.lock().is_empty());
    assert!(plane.forwarded.lock().is_empty());
    assert!(plane.blocked_udp.lock().is_empty());
}

fn refresh_checksum(packet: &mut [u8]) {
    packet[10] = 0;
    packet[11] = 0;
    let ihl = usize::from(packet[0] & 0x0F) * 4;
    let checksum = !tunguard::util::calc_checksum(0, &packet[..ihl.min(packet.len())]);
    packet[10..12].copy_from_slice(&checksum.to_be_bytes());
}

// ============================================================================
// Input Validation Tests
// ============================================================================

#[test]
fn test_input_validation_every_ipv4_prefix_dropped() {
    let (engine, policy, plane) = engine();
    let packets = [
        ipv4(TCP, SRC, DST, &tcp(40000, 443, SYN, &[])),
        ipv4(UDP, SRC, DST, &udp(5000, 53, b"query")),
        ipv4(ICMP, SRC, DST, &icmp_echo(1)),
    ];

    for packet in &packets {
        for len in 0..packet.len() {
            let outcome = engine.dispatch(&packet[..len], 0);
            assert!(outcome.is_dropped(), "prefix {len}: {outcome}");
        }
    }
    assert_untouched(&policy, &plane);
}

#[test]
fn test_input_validation_every_ipv6_prefix_safe() {
    let (engine, policy, plane) = engine();
    let src: Ipv6Addr = "fd00::2".parse().unwrap();
    let dst: Ipv6Addr = "2001:4860:4860::8888".parse().unwrap();
    let packet = ipv6(TCP, src, dst, &tcp(40000, 443, SYN, &[]));

    for len in 0..40 {
        assert!(engine.dispatch(&packet[..len], 0).is_dropped());
    }
    assert_untouched(&policy, &plane);

    for len in 40..packet.len() {
        let _ = engine.dispatch(&packet[..len], 0);
    }
}

#[test]
fn test_input_validation_bad_version() {
    let (engine, policy, plane) = engine();
    for first in [0x00, 0x15, 0x55, 0x75, 0xF5] {
        let mut packet = ipv4(UDP, SRC, DST, &udp(1, 2, b"x"));
        packet[0] = first;
        assert_eq!(
            engine.dispatch(&packet, 0),
            DispatchOutcome::Dropped(DropReason::Malformed(PacketError::UnsupportedVersion(
                first >> 4
            )))
        );
    }
    assert_untouched(&policy, &plane);
}

#[test]
fn test_input_validation_fragments_dropped() {
    let (engine, policy, plane) = engine();

    // More-fragments set, at offset zero and beyond
    for offset_word in [0x2000u16, 0x2010] {
        let mut packet = ipv4(UDP, SRC, DST, &udp(5000, 53, b"part one"));
        packet[6..8].copy_from_slice(&offset_word.to_be_bytes());
        refresh_checksum(&mut packet);
        assert!(matches!(
            engine.dispatch(&packet, 0),
            DispatchOutcome::Dropped(DropReason::Malformed(PacketError::Fragmented { .. }))
        ));
    }
    assert_untouched(&policy, &plane);

    // The final fragment carries no more-fragments flag and is not refused here
    let mut last = ipv4(UDP, SRC, DST, &udp(5000, 53, b"part two"));
    last[6..8].copy_from_slice(&0x0010u16.to_be_bytes());
    refresh_checksum(&mut last);
    assert!(!matches!(
        engine.dispatch(&last, 0),
        DispatchOutcome::Dropped(DropReason::Malformed(PacketError::Fragmented { .. }))
    ));
}

#[test]
fn test_input_validation_checksum_enforced() {
    let (engine, policy, plane) = engine();
    let mut packet = ipv4(ICMP, SRC, DST, &icmp_echo(5));
    packet[8] = 1;
    assert_eq!(
        engine.dispatch(&packet, 0),
        DispatchOutcome::Dropped(DropReason::Malformed(PacketError::BadChecksum))
    );
    assert_untouched(&policy, &plane);
}

// ============================================================================
// Boundary Tests
// ============================================================================

#[test]
fn test_boundary_header_length_field() {
    let (engine, policy, plane) = engine();

    for ihl in [0u8, 1, 4, 15] {
        let mut packet = ipv4(TCP, SRC, DST, &tcp(40000, 443, SYN, &[]));
        packet[0] = 0x40 | ihl;
        refresh_checksum(&mut packet);
        assert!(engine.dispatch(&packet, 0).is_dropped(), "ihl {ihl}");
    }
    assert_untouched(&policy, &plane);
}

#[test]
fn test_boundary_total_length_field() {
    let (engine, policy, plane) = engine();

    for declared in [0u16, 19, 20, 39, 41, u16::MAX] {
        let mut packet = ipv4(TCP, SRC, DST, &tcp(40000, 443, SYN, &[]));
        packet[2..4].copy_from_slice(&declared.to_be_bytes());
        refresh_checksum(&mut packet);
        assert!(engine.dispatch(&packet, 0).is_dropped(), "total {declared}");
    }

    // Trailing bytes beyond the declared length are a mismatch too
    let mut padded = ipv4(UDP, SRC, DST, &udp(5000, 53, b"q"));
    padded.extend_from_slice(&[0; 4]);
    assert!(engine.dispatch(&padded, 0).is_dropped());

    assert_untouched(&policy, &plane);
}

#[test]
fn test_boundary_tcp_data_offset_past_segment() {
    let (engine, _policy, _plane) = engine();
    let mut segment = tcp(40000, 443, ACK, &[]);
    segment[12] = 0xF0;
    let packet = ipv4(TCP, SRC, DST, &segment);

    // Header parses; the payload accessor must clamp
    if let Ok(view) = PacketView::parse(&packet, true) {
        assert!(view.tcp_payload().is_empty());
    }
    let _ = engine.dispatch(&packet, 0);
}

#[test]
fn test_boundary_ipv6_extension_chain() {
    let (engine, _policy, _plane) = engine();
    let src: Ipv6Addr = "fd00::2".parse().unwrap();
    let dst: Ipv6Addr = "fd00::1".parse().unwrap();

    // Forty chained destination-options headers, then UDP
    let mut rest = Vec::new();
    for i in 0..40 {
        let next = if i == 39 { UDP } else { 60 };
        rest.extend_from_slice(&[next, 0, 0, 0, 0, 0, 0, 0]);
    }
    rest.extend_from_slice(&udp(6000, 53, b"q"));
    let packet = ipv6(60, src, dst, &rest);

    let _ = engine.dispatch(&packet, 0);

    // Extension header claiming more bytes than remain
    let mut rest = vec![UDP, 0xFF, 0, 0, 0, 0, 0, 0];
    rest.extend_from_slice(&udp(6000, 53, b"q"));
    let _ = engine.dispatch(&ipv6(0, src, dst, &rest), 0);
}

#[test]
fn test_boundary_hostname_length() {
    let max = "a".repeat(255);
    let hello = client_hello_with(&[(0, server_name_ext(max.as_bytes()))]);
    assert_eq!(extract_sni(&hello, None), SniOutcome::Hostname(max));

    let long = "a".repeat(256);
    let hello = client_hello_with(&[(0, server_name_ext(long.as_bytes()))]);
    assert_eq!(
        extract_sni(&hello, None),
        SniOutcome::Rejected(TlsRejectReason::HostnameTooLong)
    );
}

#[test]
fn test_boundary_server_name_overruns_extension() {
    let mut ext = server_name_ext(b"example.com");
    // Name length claims more than the extension holds
    ext[3..5].copy_from_slice(&200u16.to_be_bytes());
    let hello = client_hello_with(&[(0, ext)]);
    let outcome = extract_sni(&hello, None);
    assert!(outcome.hostname().is_none());
    assert!(outcome.is_failure() || outcome == SniOutcome::NoSni, "{outcome:?}");
}

#[test]
fn test_boundary_invalid_utf8_hostname() {
    let hello = client_hello_with(&[(0, server_name_ext(&[0x61, 0xC3, 0x28, 0x62]))]);
    assert_eq!(extract_sni(&hello, None), SniOutcome::InvalidEncoding);

    // Discarded name leaves the session undecided
    let (engine, _policy, _plane) = engine();
    let mut session = TlsSession::new(UidLookup::Resolved(10_001));
    assert_eq!(engine.inspect_tls(&hello, &mut session), TlsVerdict::Allow);
    assert_eq!(session.hostname(), None);
}

#[test]
fn test_boundary_every_client_hello_prefix() {
    let hello = client_hello("prefix.example");
    for len in 0..hello.len() {
        let outcome = extract_sni(&hello[..len], None);
        assert!(outcome.hostname().is_none(), "prefix {len}: {outcome:?}");
    }
    assert_eq!(
        extract_sni(&hello, None),
        SniOutcome::Hostname("prefix.example".into())
    );
}

#[test]
fn test_boundary_record_length_beyond_buffer() {
    let mut hello = client_hello("big.example");
    hello[3..5].copy_from_slice(&u16::MAX.to_be_bytes());
    // An incomplete record yields no name
    assert_eq!(
        extract_sni(&hello, None),
        SniOutcome::Rejected(TlsRejectReason::Truncated)
    );
}

// ============================================================================
// Fuzz Tests
// ============================================================================

#[test]
fn test_fuzz_random_packets() {
    let (engine, _policy, _plane) = engine();
    let mut rng = StdRng::seed_from_u64(0x7475_6e67);

    for _ in 0..5_000 {
        let len = rng.gen_range(0..128);
        let mut packet = vec![0u8; len];
        rng.fill(packet.as_mut_slice());
        if len > 0 && rng.gen_bool(0.5) {
            packet[0] = if rng.gen_bool(0.5) { 0x45 } else { 0x60 };
        }
        let _ = engine.dispatch(&packet, rng.gen_range(0..2048));
    }
}

#[test]
fn test_fuzz_mutated_client_hello() {
    let base = client_hello("mutate.example");
    let mut rng = StdRng::seed_from_u64(42);
    let (engine, _policy, _plane) = engine();

    for _ in 0..5_000 {
        let mut hello = base.clone();
        for _ in 0..rng.gen_range(1..4) {
            let index = rng.gen_range(0..hello.len());
            hello[index] = rng.gen();
        }
        let outcome = extract_sni(&hello, None);
        if let Some(name) = outcome.hostname() {
            assert!(name.len() <= 255);
        }

        let mut session = TlsSession::default();
        let _ = engine.inspect_tls(&hello, &mut session);
    }
}
