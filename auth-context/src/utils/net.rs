//! Address helpers for the auth proxy allow-list.

use ipnetwork::IpNetwork;
use std::net::{IpAddr, SocketAddr};

/// Parses a comma separated list of networks. Bare addresses become
/// single-host networks (/32 or /128).
pub fn parse_allow_list(list: &str) -> Result<Vec<IpNetwork>, anyhow::Error> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry.contains('/') {
                entry
                    .parse::<IpNetwork>()
                    .map_err(|e| anyhow::anyhow!("Invalid network '{}': {}", entry, e))
            } else {
                entry
                    .parse::<IpAddr>()
                    .map(IpNetwork::from)
                    .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", entry, e))
            }
        })
        .collect()
}

/// Extracts the IP from `ip:port`, `[v6]:port` or a bare address.
pub fn parse_remote_ip(addr: &str) -> Result<IpAddr, anyhow::Error> {
    let addr = addr.trim();
    if let Ok(socket) = addr.parse::<SocketAddr>() {
        return Ok(socket.ip());
    }
    addr.trim_start_matches('[')
        .trim_end_matches(']')
        .parse::<IpAddr>()
        .map_err(|e| anyhow::anyhow!("Could not parse address '{}': {}", addr, e))
}
