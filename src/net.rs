//! Network helpers: the default echo endpoints and local address detection.
//!
//! These are standalone helpers not tied to the race or the scorer.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use sysinfo::Networks;
use tokio::net::UdpSocket;
use tracing::debug;

/// Endpoints that answer a plain GET with the caller's address.
pub const DEFAULT_ENDPOINTS: &[&str] = &[
    "https://checkip.amazonaws.com/",
    "http://myexternalip.com/raw",
    "https://ifconfig.me/ip",
    "https://ipinfo.io/ip",
    "https://icanhazip.com",
    "https://api.ipify.org",
    "https://ifconfig.co/ip",
];

/// Well-known public resolver used only to pick an outbound route.
const ROUTE_PROBE: &str = "8.8.8.8:53";

/// Detect the address this host uses for outbound traffic.
///
/// Connecting a UDP socket sends nothing; it only asks the kernel which
/// source address it would use. Falls back to scanning interfaces when there
/// is no default route or the route is not IPv4.
pub async fn internal_ip() -> Option<IpAddr> {
    match tokio::time::timeout(Duration::from_secs(3), routed_ip()).await {
        Ok(Ok(ip @ IpAddr::V4(v4))) if !v4.is_unspecified() => return Some(ip),
        Ok(Ok(ip)) => debug!(ip = %ip, "routed address is not IPv4"),
        Ok(Err(e)) => debug!(error = %e, "route lookup failed"),
        Err(_) => debug!("route lookup timed out"),
    }
    local_ip()
}

async fn routed_ip() -> std::io::Result<IpAddr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
    socket.connect(ROUTE_PROBE).await?;
    Ok(socket.local_addr()?.ip())
}

/// First usable IPv4 interface address. May pick a virtual interface.
pub fn local_ip() -> Option<IpAddr> {
    let networks = Networks::new_with_refreshed_list();
    let mut addrs = networks
        .list()
        .iter()
        .flat_map(|(_, data)| data.ip_networks().iter().map(|n| n.addr));
    addrs.find(|ip| is_usable_v4(*ip))
}

fn is_usable_v4(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback() || v4.is_multicast() || v4.is_link_local() || v4.is_unspecified())
        }
        IpAddr::V6(_) => false,
    }
}
