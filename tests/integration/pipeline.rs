//! End-to-end pipeline tests
//!
//! Packets flow through a `FirewallEngine` wired to a real `UidResolver`
//! reading connection tables from a temp directory.

use std::collections::HashSet;
use std::fs;
use std::io::{self, Write};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use tunguard::config::{apply_env_overrides, load_config, Config, EngineConfig, ProbeConfig};
use tunguard::engine::{DispatchOutcome, DropReason, FirewallEngine, Redirect};
use tunguard::probe::{wait_for_tunnel_up, ProbeSink};
use tunguard::sniff::{TlsSession, TlsVerdict};
use tunguard::uid::{UidCache, UidLookup, UidResolver};
use tunguard::{ConfigError, PacketView, ProbeError};

use super::*;

const CLIENT: Ipv4Addr = Ipv4Addr::new(10, 1, 10, 1);
const SERVER: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);

struct Harness {
    engine: FirewallEngine,
    resolver: Arc<UidResolver>,
    policy: Arc<RecordingPolicy>,
    plane: Arc<DataPlane>,
    root: TempDir,
}

fn harness(root: TempDir, policy: RecordingPolicy, max_sessions: usize) -> Harness {
    let resolver = Arc::new(UidResolver::with_cache(UidCache::new(
        Duration::from_millis(30_000),
        root.path(),
    )));
    let policy = Arc::new(policy);
    let plane = Arc::new(DataPlane::default());
    let config = EngineConfig {
        max_sessions,
        ..EngineConfig::default()
    };
    let engine = FirewallEngine::new(
        config,
        resolver.clone(),
        policy.clone(),
        plane.clone(),
        plane.clone(),
    );
    Harness {
        engine,
        resolver,
        policy,
        plane,
        root,
    }
}

/// Tables holding one TCP socket from CLIENT:40000 to SERVER:443
fn tcp_tables(uid: u32) -> TempDir {
    let root = TempDir::new().unwrap();
    write_table(root.path(), "tcp6", &[]);
    write_table(
        root.path(),
        "tcp",
        &[proc_line(&CLIENT.octets(), 40000, &SERVER.octets(), 443, uid)],
    );
    root
}

#[test]
fn test_syn_attributed_to_socket_owner() {
    let h = harness(tcp_tables(10_123), RecordingPolicy::default(), 64);

    let packet = ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, SYN, &[]));
    assert!(h.engine.dispatch(&packet, 0).is_allowed());

    let record = h.policy.last_record().unwrap();
    assert_eq!(record.uid, UidLookup::Resolved(10_123));
    assert_eq!(record.flags, "S");
    assert_eq!(record.source, IpAddr::V4(CLIENT));
    assert_eq!(record.destination_port, 443);
    assert_eq!(
        h.plane.forwarded.lock().as_slice(),
        &[(TCP, UidLookup::Resolved(10_123))]
    );
}

#[test]
fn test_repeat_lookup_served_from_cache() {
    let h = harness(tcp_tables(10_123), RecordingPolicy::default(), 64);
    let packet = ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, SYN, &[]));

    h.engine.dispatch(&packet, 0);
    let scans_after_first = h.resolver.stats().scans;

    // Table rewritten with another owner; the cached entry is still fresh
    write_table(
        h.root.path(),
        "tcp",
        &[proc_line(&CLIENT.octets(), 40000, &SERVER.octets(), 443, 20_000)],
    );
    h.engine.dispatch(&packet, 0);

    assert_eq!(h.policy.last_record().unwrap().uid, UidLookup::Resolved(10_123));
    let stats = h.resolver.stats();
    assert!(stats.hits >= 1);
    // Only the v6 pass went back to disk
    assert_eq!(stats.scans, scans_after_first + 1);
}

#[test]
fn test_dual_stack_socket_wins_over_v4_table() {
    let root = TempDir::new().unwrap();
    let mapped = |ip: Ipv4Addr| ip.to_ipv6_mapped().octets();
    write_table(
        root.path(),
        "tcp6",
        &[proc_line(&mapped(CLIENT), 40000, &mapped(SERVER), 443, 10_200)],
    );
    write_table(
        root.path(),
        "tcp",
        &[proc_line(&CLIENT.octets(), 40000, &SERVER.octets(), 443, 999)],
    );
    let h = harness(root, RecordingPolicy::default(), 64);

    h.engine
        .dispatch(&ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, SYN, &[])), 0);
    assert_eq!(h.policy.last_record().unwrap().uid, UidLookup::Resolved(10_200));
}

#[test]
fn test_unreadable_tables_still_reach_policy() {
    let h = harness(TempDir::new().unwrap(), RecordingPolicy::default(), 64);

    let packet = ipv4(UDP, CLIENT, SERVER, &udp(5353, 53, b"query"));
    assert!(h.engine.dispatch(&packet, 0).is_allowed());

    let record = h.policy.last_record().unwrap();
    assert_eq!(record.uid, UidLookup::Unavailable);
    assert_eq!(record.uid.sentinel(), -2);
}

#[test]
fn test_ipv6_flow_uses_v6_table_only() {
    let client: Ipv6Addr = "fd00::2".parse().unwrap();
    let server: Ipv6Addr = "2606:4700::1111".parse().unwrap();
    let root = TempDir::new().unwrap();
    write_table(
        root.path(),
        "udp6",
        &[proc_line(&client.octets(), 6000, &[0u8; 16], 0, 10_300)],
    );
    let h = harness(root, RecordingPolicy::default(), 64);

    let packet = ipv6(UDP, client, server, &udp(6000, 443, b"hello"));
    assert!(h.engine.dispatch(&packet, 0).is_allowed());
    // Unconnected socket matched through its wildcard remote
    assert_eq!(h.policy.last_record().unwrap().uid, UidLookup::Resolved(10_300));
}

#[test]
fn test_udp_session_lifecycle() {
    let policy = RecordingPolicy {
        refused_ports: HashSet::from([443]),
        ..RecordingPolicy::default()
    };
    let h = harness(TempDir::new().unwrap(), policy, 64);

    // Allowed flow creates a session, later packets skip the policy
    let dns = ipv4(UDP, CLIENT, SERVER, &udp(5353, 53, b"q"));
    h.engine.dispatch(&dns, 0);
    h.engine.dispatch(&dns, 1);
    assert_eq!(h.policy.records.lock().len(), 1);
    assert_eq!(h.plane.forwarded.lock().len(), 2);
    assert_eq!(h.plane.forwarded.lock()[1].1, UidLookup::NotLooked);

    // Refused flow is torn down through block_udp
    let quic = ipv4(UDP, CLIENT, SERVER, &udp(5000, 443, b"initial"));
    assert_eq!(
        h.engine.dispatch(&quic, 1),
        DispatchOutcome::Blocked { protocol: UDP }
    );
    assert_eq!(h.plane.blocked_udp.lock().len(), 1);
}

#[test]
fn test_redirect_reaches_outcome() {
    let target = Redirect::to(IpAddr::V4(Ipv4Addr::LOCALHOST), 5353);
    let policy = RecordingPolicy {
        redirect: Some(target),
        ..RecordingPolicy::default()
    };
    let h = harness(TempDir::new().unwrap(), policy, 64);

    let outcome = h
        .engine
        .dispatch(&ipv4(UDP, CLIENT, SERVER, &udp(5353, 53, b"q")), 0);
    assert_eq!(
        outcome,
        DispatchOutcome::Allowed {
            protocol: UDP,
            redirect: Some(target)
        }
    );
    assert_eq!(outcome.to_string(), "allowed p17 -> 127.0.0.1/5353");
}

#[test]
fn test_tls_session_blocked_on_first_application_data() {
    let policy = RecordingPolicy {
        blocked_domains: HashSet::from(["tracker.example".to_string()]),
        ..RecordingPolicy::default()
    };
    let h = harness(tcp_tables(10_123), policy, 64);

    let syn = ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, SYN, &[]));
    h.engine.dispatch(&syn, 0);
    let mut session = TlsSession::new(h.policy.last_record().unwrap().uid);

    let hello = ipv4(
        TCP,
        CLIENT,
        SERVER,
        &tcp(40000, 443, ACK | PSH, &client_hello("tracker.example")),
    );
    assert!(h.engine.dispatch(&hello, 1).is_allowed());
    let view = PacketView::parse(&hello, true).unwrap();
    assert_eq!(
        h.engine.inspect_tls(view.tcp_payload(), &mut session),
        TlsVerdict::Captured("tracker.example".into())
    );

    let record = application_data(64);
    let data = ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, ACK | PSH, &record));
    let view = PacketView::parse(&data, true).unwrap();
    assert_eq!(
        h.engine.inspect_tls(view.tcp_payload(), &mut session),
        TlsVerdict::Block
    );
    assert_eq!(
        h.policy.domain_checks.lock().as_slice(),
        &[("tracker.example".to_string(), UidLookup::Resolved(10_123))]
    );
}

#[test]
fn test_tls_session_allowed_domain() {
    let h = harness(tcp_tables(10_123), RecordingPolicy::default(), 64);
    let mut session = TlsSession::new(UidLookup::Resolved(10_123));

    assert!(matches!(
        h.engine.inspect_tls(&client_hello("ok.example"), &mut session),
        TlsVerdict::Captured(_)
    ));
    assert_eq!(
        h.engine.inspect_tls(&application_data(16), &mut session),
        TlsVerdict::Allow
    );
}

#[test]
fn test_session_cap_only_refuses_new_flows() {
    let h = harness(tcp_tables(10_123), RecordingPolicy::default(), 2);

    let ping = ipv4(ICMP, CLIENT, SERVER, &icmp_echo(1));
    assert_eq!(
        h.engine.dispatch(&ping, 2),
        DispatchOutcome::Dropped(DropReason::SessionLimit { open: 2, max: 2 })
    );

    let established = ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, ACK, b"more"));
    assert!(h.engine.dispatch(&established, 2).is_allowed());

    assert!(h.policy.records.lock().is_empty());
    assert_eq!(h.resolver.stats().misses, 0);
    assert_eq!(h.engine.stats().snapshot().dropped_session_limit, 1);
}

#[test]
fn test_config_file_drives_engine() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json");
    let tables = tcp_tables(10_123);
    let json = format!(
        r#"{{
            "engine": {{ "max_sessions": 1 }},
            "uid_cache": {{ "proc_net_root": {:?} }}
        }}"#,
        tables.path()
    );
    fs::write(&path, json).unwrap();

    let config = load_config(&path).unwrap();
    assert_eq!(config.engine.max_sessions, 1);
    assert_eq!(config.uid_cache.ttl_ms, 30_000);

    let policy = Arc::new(RecordingPolicy::default());
    let plane = Arc::new(DataPlane::default());
    let engine = FirewallEngine::from_config(&config, policy.clone(), plane.clone(), plane);

    let syn = ipv4(TCP, CLIENT, SERVER, &tcp(40000, 443, SYN, &[]));
    assert!(engine.dispatch(&syn, 0).is_allowed());
    assert_eq!(policy.last_record().unwrap().uid, UidLookup::Resolved(10_123));
    assert!(engine.dispatch(&syn, 1).is_dropped());
}

#[test]
fn test_env_overrides_applied() {
    let config = apply_env_overrides(Config::default(), |name| match name {
        "TUNGUARD_MAX_SESSIONS" => Some("12".into()),
        "TUNGUARD_PROC_NET_ROOT" => Some("/tmp/fake-net".into()),
        _ => None,
    })
    .unwrap();
    assert_eq!(config.engine.max_sessions, 12);
    assert_eq!(config.uid_cache.proc_net_root.to_str(), Some("/tmp/fake-net"));

    let err = apply_env_overrides(Config::default(), |name| {
        (name == "TUNGUARD_MAX_SESSIONS").then(|| "lots".to_string())
    })
    .unwrap_err();
    assert!(matches!(err, ConfigError::EnvError { .. }));
}

#[test]
fn test_missing_config_file() {
    let err = load_config("/nonexistent/tunguard.json").unwrap_err();
    assert!(matches!(err, ConfigError::FileNotFound { .. }));
}

struct NullSink;

impl ProbeSink for NullSink {
    fn send_probe(&self, _destination: SocketAddr, payload: &[u8]) -> io::Result<usize> {
        Ok(payload.len())
    }
}

#[test]
fn test_probe_then_dispatch() {
    let (mut tun_peer, tun) = UnixStream::pair().unwrap();
    let config = ProbeConfig {
        overall_timeout_ms: 2_000,
        poll_interval_ms: 20,
        ..ProbeConfig::default()
    };

    let packet = ipv4(ICMP, CLIENT, SERVER, &icmp_echo(7));
    tun_peer.write_all(&packet).unwrap();
    let report = wait_for_tunnel_up(tun.as_raw_fd(), &config, &NullSink).unwrap();
    assert_eq!(report.probes_sent, 0);

    let h = harness(TempDir::new().unwrap(), RecordingPolicy::default(), 64);
    assert!(h.engine.dispatch(&packet, 0).is_allowed());
}

#[test]
fn test_probe_timeout_is_startup_failure() {
    let (_peer, tun) = UnixStream::pair().unwrap();
    let config = ProbeConfig {
        overall_timeout_ms: 40,
        poll_interval_ms: 10,
        ..ProbeConfig::default()
    };

    let err = wait_for_tunnel_up(tun.as_raw_fd(), &config, &NullSink).unwrap_err();
    assert!(matches!(err, ProbeError::Timeout { .. }));
}
