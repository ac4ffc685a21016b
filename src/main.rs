//! tunguard: diagnostic driver for the firewall engine
//!
//! Reads hex-encoded IP packets from stdin, one per line, and prints the
//! dispatch outcome for each. TCP payloads of tracked flows are passed
//! through TLS inspection.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! echo 4500001c... | tunguard
//!
//! # Block a domain and its subdomains
//! tunguard -c /path/to/config.json --block example.com < packets.hex
//!
//! # Run with environment overrides
//! TUNGUARD_LOG_LEVEL=debug tunguard < packets.hex
//! ```

use std::collections::{HashMap, HashSet};
use std::io::{self, BufRead};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use parking_lot::Mutex;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

use tunguard::config::{load_config_with_env, Config};
use tunguard::engine::{
    DecisionRecord, FirewallEngine, PolicyOracle, ProtocolHandlers, Redirect, SessionTable,
};
use tunguard::packet::{PacketView, IPPROTO_UDP};
use tunguard::sniff::{TlsSession, TlsVerdict};
use tunguard::uid::UidLookup;
use tunguard::util::hex::hex_to_bytes;
use tunguard::TunguardError;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
    /// Blocked domains
    blocked: HashSet<String>,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/tunguard/config.json");
        let mut generate_config = false;
        let mut check_config = false;
        let mut blocked = HashSet::new();

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "--block" => {
                    if let Some(domain) = args.next() {
                        blocked.insert(domain.trim_end_matches('.').to_ascii_lowercase());
                    }
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("tunguard v{}", tunguard::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
            blocked,
        }
    }
}

fn print_help() {
    println!(
        r"tunguard v{}

On-device tun firewall core, driven from hex packets on stdin.

USAGE:
    tunguard [OPTIONS] < packets.hex

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/tunguard/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    --block <DOMAIN>        Block TLS sessions to DOMAIN and its subdomains (repeatable)
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    TUNGUARD_LOG_LEVEL      Override log level (trace, debug, info, warn, error)
    TUNGUARD_MAX_SESSIONS   Override the session cap
    TUNGUARD_PROC_NET_ROOT  Override the connection table directory
",
        tunguard::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) -> Result<()> {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target)
        .with_writer(io::stderr);

    if config.log.is_json() {
        subscriber.json().try_init()
    } else {
        subscriber.try_init()
    }
    .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {e}"))
}

/// Allows every address; blocks listed domains by suffix
struct DiagnosticPolicy {
    blocked: HashSet<String>,
}

impl PolicyOracle for DiagnosticPolicy {
    fn is_address_allowed(&self, _record: &DecisionRecord) -> Option<Redirect> {
        Some(Redirect::none())
    }

    fn is_domain_blocked(&self, hostname: &str, uid: UidLookup) -> bool {
        let hostname = hostname.to_ascii_lowercase();
        let blocked = self.blocked.iter().any(|domain| {
            hostname == *domain
                || hostname
                    .strip_suffix(domain.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        });
        debug!(%hostname, %uid, blocked, "Domain check");
        blocked
    }
}

type FlowKey = (u8, IpAddr, u16, IpAddr, u16);

fn flow_key(packet: &PacketView<'_>) -> FlowKey {
    (
        packet.protocol,
        packet.source,
        packet.source_port,
        packet.destination,
        packet.destination_port,
    )
}

/// In-memory flows standing in for the data plane
#[derive(Default)]
struct FlowTable {
    udp: Mutex<HashSet<FlowKey>>,
    tcp: Mutex<HashMap<FlowKey, TlsSession>>,
}

impl FlowTable {
    fn len(&self) -> usize {
        self.udp.lock().len() + self.tcp.lock().len()
    }
}

impl SessionTable for FlowTable {
    fn has_existing_session(&self, protocol: u8, packet: &PacketView<'_>) -> bool {
        protocol == IPPROTO_UDP && self.udp.lock().contains(&flow_key(packet))
    }
}

impl ProtocolHandlers for FlowTable {
    fn handle_icmp(&self, packet: &PacketView<'_>, uid: UidLookup) {
        debug!(destination = %packet.destination, %uid, "ICMP forwarded");
    }

    fn handle_udp(&self, packet: &PacketView<'_>, _uid: UidLookup, _redirect: Option<&Redirect>) {
        self.udp.lock().insert(flow_key(packet));
    }

    fn handle_tcp(&self, packet: &PacketView<'_>, uid: UidLookup, _redirect: Option<&Redirect>) {
        let key = flow_key(packet);
        if packet.is_tcp_syn() {
            self.tcp.lock().insert(key, TlsSession::new(uid));
        } else if packet.tcp_flags.fin() || packet.tcp_flags.rst() {
            self.tcp.lock().remove(&key);
        }
    }

    fn block_udp(&self, packet: &PacketView<'_>, _uid: UidLookup) {
        self.udp.lock().remove(&flow_key(packet));
    }
}

/// Run TLS inspection on a forwarded TCP segment of a tracked flow
fn inspect(
    engine: &FirewallEngine,
    flows: &FlowTable,
    packet: &[u8],
    verify: bool,
) -> Option<TlsVerdict> {
    let view = PacketView::parse(packet, verify).ok()?;
    let payload = view.tcp_payload();
    if !view.is_tcp() || payload.is_empty() {
        return None;
    }

    let key = flow_key(&view);
    let mut sessions = flows.tcp.lock();
    let session = sessions.get_mut(&key)?;
    let verdict = engine.inspect_tls(payload, session);
    if verdict.is_block() {
        sessions.remove(&key);
    }
    Some(verdict)
}

/// Load the configuration file, falling back to defaults when it does not exist
fn load_configuration(path: &Path) -> std::result::Result<Config, TunguardError> {
    if !path.exists() {
        return Ok(Config::default_config());
    }
    Ok(load_config_with_env(path)?)
}

fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        tunguard::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // A missing config file falls back to defaults
    let config = load_configuration(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config)?;

    info!(version = tunguard::VERSION, "tunguard starting");
    info!(
        max_sessions = config.engine.max_sessions,
        blocked = args.blocked.len(),
        "Configuration loaded"
    );

    let flows = Arc::new(FlowTable::default());
    let policy = Arc::new(DiagnosticPolicy {
        blocked: args.blocked,
    });
    let engine = FirewallEngine::from_config(&config, policy, flows.clone(), flows.clone());
    let verify = config.engine.verify_ipv4_checksum;

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    for (index, line) in io::stdin().lock().lines().enumerate() {
        let line = line.map_err(TunguardError::Io)?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let packet = match hex_to_bytes(line) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping invalid hex");
                continue;
            }
        };
        if packet.len() > config.engine.mtu {
            warn!(
                line = index + 1,
                len = packet.len(),
                mtu = config.engine.mtu,
                "Skipping oversized packet"
            );
            continue;
        }

        let outcome = engine.dispatch(&packet, flows.len());
        let verdict = if outcome.is_allowed() {
            inspect(&engine, &flows, &packet, verify)
        } else {
            None
        };
        match verdict {
            Some(TlsVerdict::Captured(hostname)) => println!("{outcome} sni={hostname}"),
            Some(TlsVerdict::Block) => println!("{outcome} tls=blocked"),
            _ => println!("{outcome}"),
        }
    }

    let stats = engine.stats().snapshot();
    info!(
        received = stats.received,
        allowed = stats.allowed,
        blocked = stats.blocked,
        dropped = stats.dropped(),
        tls_blocked = stats.tls_blocked,
        "Final stats"
    );
    engine.shutdown();

    Ok(())
}
