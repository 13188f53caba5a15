//! Reachability and round-trip time: ICMP echo first, TCP connect as a fallback.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use rand::random;
use surge_ping::{Client, Config, ICMP, PingIdentifier, PingSequence};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::db::entities::nas_device;

pub const PING_COUNT: u16 = 3;
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Tried after the device's own management ports.
pub const FALLBACK_PORTS: [u16; 6] = [80, 443, 22, 23, 8291, 8728];

/// Result of one latency probe. `latency_ms` is −1 when nothing answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LatencyResult {
    pub latency_ms: i32,
    pub message: String,
}

impl LatencyResult {
    pub fn reachable(rtt: Duration, message: String) -> Self {
        Self {
            latency_ms: i32::try_from(rtt.as_millis()).unwrap_or(i32::MAX),
            message,
        }
    }

    pub fn unreachable(message: String) -> Self {
        Self {
            latency_ms: nas_device::LATENCY_UNREACHABLE,
            message,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.latency_ms >= 0
    }
}

fn valid_port(port: i32) -> Option<u16> {
    u16::try_from(port).ok().filter(|p| *p != 0)
}

/// TCP ports to try, in order: API port, SNMP port, then the fixed fallbacks. No port
/// appears twice.
pub fn tcp_candidate_ports(device: &nas_device::Model) -> Vec<u16> {
    let mut ports = Vec::with_capacity(FALLBACK_PORTS.len() + 2);
    let own = [
        device.api_enabled.then(|| valid_port(device.api_port)).flatten(),
        device.snmp_enabled.then(|| valid_port(device.snmp_port)).flatten(),
    ];
    for port in own.into_iter().flatten().chain(FALLBACK_PORTS) {
        if !ports.contains(&port) {
            ports.push(port);
        }
    }
    ports
}

/// Connects to each port in turn and returns the first one that accepted, with the
/// time the handshake took.
pub async fn tcp_rtt(host: &str, ports: &[u16], timeout: Duration) -> Option<(u16, Duration)> {
    for &port in ports {
        let started = Instant::now();
        match tokio::time::timeout(timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => return Some((port, started.elapsed())),
            Ok(Err(e)) => debug!(host, port, error = %e, "TCP probe refused."),
            Err(_) => debug!(host, port, "TCP probe timed out."),
        }
    }
    None
}

/// Shared ICMP sockets, one per address family. A family whose socket could not be
/// opened (e.g. unprivileged ping disabled by the kernel) is skipped and the TCP
/// fallback decides.
pub struct IcmpPinger {
    v4: Option<Client>,
    v6: Option<Client>,
}

impl IcmpPinger {
    /// Must be called from within a tokio runtime.
    pub fn new() -> Self {
        let v4 = Client::new(&Config::default())
            .inspect_err(|e| warn!(error = %e, "ICMPv4 socket unavailable; using TCP probes only."))
            .ok();
        let v6 = Client::new(&Config::builder().kind(ICMP::V6).build())
            .inspect_err(|e| debug!(error = %e, "ICMPv6 socket unavailable."))
            .ok();
        Self { v4, v6 }
    }

    pub fn disabled() -> Self {
        Self { v4: None, v6: None }
    }

    /// Average round trip over the replies to `PING_COUNT` echoes, with how many came back.
    pub async fn rtt(&self, addr: IpAddr) -> Option<(Duration, u16)> {
        let client = match addr {
            IpAddr::V4(_) => self.v4.as_ref()?,
            IpAddr::V6(_) => self.v6.as_ref()?,
        };
        let mut pinger = client.pinger(addr, PingIdentifier(random())).await;
        pinger.timeout(PING_TIMEOUT);

        let mut total = Duration::ZERO;
        let mut replies = 0u16;
        for seq in 0..PING_COUNT {
            match pinger.ping(PingSequence(seq), &[0; 16]).await {
                Ok((_packet, rtt)) => {
                    total += rtt;
                    replies += 1;
                }
                Err(e) => debug!(%addr, seq, error = %e, "ICMP echo failed."),
            }
        }
        (replies > 0).then(|| (total / u32::from(replies), replies))
    }
}

impl Default for IcmpPinger {
    fn default() -> Self {
        Self::new()
    }
}

pub async fn measure(pinger: &IcmpPinger, device: &nas_device::Model) -> LatencyResult {
    if let Ok(addr) = device.ipaddr.parse::<IpAddr>() {
        if let Some((rtt, replies)) = pinger.rtt(addr).await {
            return LatencyResult::reachable(
                rtt,
                format!("icmp {replies}/{PING_COUNT} replies"),
            );
        }
    }

    let ports = tcp_candidate_ports(device);
    match tcp_rtt(&device.ipaddr, &ports, TCP_CONNECT_TIMEOUT).await {
        Some((port, rtt)) => LatencyResult::reachable(rtt, format!("tcp/{port} connected")),
        None => {
            let tried: Vec<String> = ports.iter().map(u16::to_string).collect();
            LatencyResult::unreachable(format!(
                "no icmp reply and no tcp port accepted ({})",
                tried.join(",")
            ))
        }
    }
}
