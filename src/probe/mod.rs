//! Tunnel readiness probing
//!
//! After the tun interface is configured the kernel may not route anything
//! into it until some traffic leaves the device. [`wait_for_tunnel_up`]
//! polls the tun descriptor and, every time a poll interval passes without
//! it becoming readable, fires a small random UDP datagram at a random
//! public address to provoke route activation. Responses are never read.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::os::unix::io::RawFd;
use std::time::{Duration, Instant};

use ipnet::{Ipv4Net, Ipv6Net};
use rand::Rng;
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::config::ProbeConfig;
use crate::error::ProbeError;

/// Ranges a probe is never sent to
const RESERVED_V4: [(Ipv4Addr, u8); 9] = [
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
];

const RESERVED_V6: [(Ipv6Addr, u8); 3] = [
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::new(0x2001, 0x0db8, 0, 0, 0, 0, 0, 0), 32),
];

/// Destination for probe datagrams
pub trait ProbeSink: Send + Sync {
    /// Send one datagram. Errors are logged by the caller and never fatal.
    fn send_probe(&self, destination: SocketAddr, payload: &[u8]) -> io::Result<usize>;
}

/// Sends probes from non-blocking UDP sockets
#[derive(Debug)]
pub struct UdpProbeSink {
    v4: Socket,
    v6: Option<Socket>,
}

impl UdpProbeSink {
    /// Open the probe sockets. The IPv6 socket is only opened when
    /// `ipv6` is set.
    ///
    /// # Errors
    ///
    /// Returns `ProbeError::Socket` if a socket cannot be created.
    pub fn new(ipv6: bool) -> Result<Self, ProbeError> {
        let v4 = Self::open(Domain::IPV4)?;
        let v6 = if ipv6 {
            Some(Self::open(Domain::IPV6)?)
        } else {
            None
        };
        Ok(Self { v4, v6 })
    }

    fn open(domain: Domain) -> Result<Socket, ProbeError> {
        let socket =
            Socket::new(domain, Type::DGRAM, Some(Protocol::UDP)).map_err(ProbeError::Socket)?;
        socket.set_nonblocking(true).map_err(ProbeError::Socket)?;
        Ok(socket)
    }
}

impl ProbeSink for UdpProbeSink {
    fn send_probe(&self, destination: SocketAddr, payload: &[u8]) -> io::Result<usize> {
        let socket = match destination {
            SocketAddr::V4(_) => &self.v4,
            SocketAddr::V6(_) => self.v6.as_ref().ok_or_else(|| {
                io::Error::new(io::ErrorKind::Unsupported, "IPv6 probing disabled")
            })?,
        };
        socket.send_to(payload, &SockAddr::from(destination))
    }
}

/// Summary of a successful wait
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Time until the descriptor became readable
    pub elapsed: Duration,
    /// Poll intervals that expired
    pub iterations: u64,
    pub probes_sent: u64,
    /// Random destinations that fell in a reserved range
    pub probes_skipped: u64,
    pub send_errors: u64,
}

/// Block until `fd` is readable, sending probes while waiting.
///
/// A descriptor in an error or hangup state counts as ready, so the wait
/// returns and the caller's next read surfaces the failure.
///
/// # Errors
///
/// Returns `ProbeError::Timeout` once `config.overall_timeout()` elapses,
/// or `ProbeError::Poll` if `poll(2)` fails with anything but `EINTR`.
pub fn wait_for_tunnel_up(
    fd: RawFd,
    config: &ProbeConfig,
    sink: &dyn ProbeSink,
) -> Result<ProbeReport, ProbeError> {
    wait_with_rng(fd, config, sink, &mut rand::thread_rng())
}

fn wait_with_rng<R: Rng>(
    fd: RawFd,
    config: &ProbeConfig,
    sink: &dyn ProbeSink,
    rng: &mut R,
) -> Result<ProbeReport, ProbeError> {
    let overall = config.overall_timeout();
    let interval = config.poll_interval();
    let start = Instant::now();
    let mut report = ProbeReport::default();

    info!(
        fd,
        timeout_ms = config.overall_timeout_ms,
        ipv6 = config.ipv6,
        "Waiting for tunnel"
    );

    loop {
        let elapsed = start.elapsed();
        if elapsed >= overall {
            warn!(
                elapsed_ms = elapsed.as_millis(),
                probes_sent = report.probes_sent,
                "Tunnel did not come up"
            );
            return Err(ProbeError::timeout(elapsed, report.probes_sent));
        }

        let wait = interval.min(overall - elapsed);
        if poll_event(fd, libc::POLLIN, wait).map_err(ProbeError::Poll)? {
            report.elapsed = start.elapsed();
            info!(
                elapsed_ms = report.elapsed.as_millis(),
                probes_sent = report.probes_sent,
                "Tunnel is up"
            );
            return Ok(report);
        }

        report.iterations += 1;
        send_random_probe(sink, config, rng, false, &mut report);
        if config.ipv6 {
            send_random_probe(sink, config, rng, true, &mut report);
        }
    }
}

fn send_random_probe<R: Rng>(
    sink: &dyn ProbeSink,
    config: &ProbeConfig,
    rng: &mut R,
    ipv6: bool,
    report: &mut ProbeReport,
) {
    let address = if ipv6 {
        IpAddr::V6(random_global_v6(rng))
    } else {
        IpAddr::V4(Ipv4Addr::from(rng.gen::<u32>()))
    };

    if !is_probe_target(address) {
        trace!(%address, "Skipping reserved probe destination");
        report.probes_skipped += 1;
        return;
    }

    let destination = SocketAddr::new(address, rng.gen_range(1..=u16::MAX));
    let max = config.max_probe_size.max(config.min_probe_size);
    let mut payload = vec![0u8; rng.gen_range(config.min_probe_size..=max)];
    rng.fill(payload.as_mut_slice());

    match sink.send_probe(destination, &payload) {
        Ok(sent) => {
            debug!(%destination, bytes = sent, "Probe sent");
            report.probes_sent += 1;
        }
        Err(e) => {
            debug!(%destination, error = %e, "Probe send failed");
            report.send_errors += 1;
        }
    }
}

/// Random address in 2000::/3
fn random_global_v6<R: Rng>(rng: &mut R) -> Ipv6Addr {
    let bits = rng.gen::<u128>();
    Ipv6Addr::from((bits & !(0b111_u128 << 125)) | (0b001_u128 << 125))
}

/// Whether a probe may be sent to `address`
#[must_use]
pub fn is_probe_target(address: IpAddr) -> bool {
    match address {
        IpAddr::V4(ip) => {
            !(ip.is_loopback() || ip.is_multicast() || ip.is_broadcast())
                && !RESERVED_V4.iter().any(|&(network, len)| {
                    Ipv4Net::new(network, len).is_ok_and(|net| net.contains(&ip))
                })
        }
        IpAddr::V6(ip) => {
            !(ip.is_loopback() || ip.is_unspecified() || ip.is_multicast())
                && !RESERVED_V6.iter().any(|&(network, len)| {
                    Ipv6Net::new(network, len).is_ok_and(|net| net.contains(&ip))
                })
        }
    }
}

/// Whether `fd` is readable right now
pub fn is_readable(fd: RawFd) -> bool {
    check_now(fd, libc::POLLIN)
}

/// Whether `fd` is writable right now
pub fn is_writable(fd: RawFd) -> bool {
    check_now(fd, libc::POLLOUT)
}

fn check_now(fd: RawFd, event: libc::c_short) -> bool {
    poll_event(fd, event, Duration::ZERO).unwrap_or_else(|e| {
        warn!(fd, error = %e, "poll failed");
        false
    })
}

/// Wait up to `timeout` for `event` on `fd`, retrying on `EINTR`
fn poll_event(fd: RawFd, event: libc::c_short, timeout: Duration) -> io::Result<bool> {
    let timeout_ms = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);
    let mut pfd = libc::pollfd {
        fd,
        events: event,
        revents: 0,
    };

    loop {
        // SAFETY: pfd is a valid pollfd and the count is 1
        let ready = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ready < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
        if ready == 0 {
            return Ok(false);
        }
        if pfd.revents & libc::POLLNVAL != 0 {
            return Err(io::Error::from_raw_os_error(libc::EBADF));
        }
        // An errored or hung-up descriptor stays ready; the next read reports why
        if pfd.revents & (libc::POLLERR | libc::POLLHUP) != 0 {
            debug!(fd, revents = pfd.revents, "Descriptor in error or hangup state");
            return Ok(true);
        }
        return Ok(pfd.revents & event != 0);
    }
}
