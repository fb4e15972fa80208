//! Endpoint resolution
//!
//! Turns `host:port` strings into socket addresses. An empty host (`:4444`) means
//! every interface when listening and the loopback interface when dialing.

use log::debug;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use super::error::{ProxyError, Result};

/// Host used for an empty listen host
const LISTEN_ANY: IpAddr = IpAddr::V4(Ipv4Addr::UNSPECIFIED);

/// Host used for an empty target host
const DIAL_LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

/// Resolved listen and target addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// Where the proxy accepts client connections
    pub listen: SocketAddr,
    /// Where every session dials
    pub target: SocketAddr,
    /// Host part of the target as written, used as the TLS server name
    pub target_host: String,
}

impl Endpoints {
    /// Resolve both endpoints
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::Resolution` for the first address that cannot be resolved.
    pub fn resolve(listen: &str, target: &str) -> Result<Self> {
        let listen_addr = resolve_listen_addr(listen)?;
        let target_addr = resolve_target_addr(target)?;
        let (host, _) = split_host_port(target)?;
        let target_host = if host.is_empty() {
            target_addr.ip().to_string()
        } else {
            host.to_string()
        };

        Ok(Self {
            listen: listen_addr,
            target: target_addr,
            target_host,
        })
    }
}

/// Resolve an address to listen on
pub fn resolve_listen_addr(addr: &str) -> Result<SocketAddr> {
    resolve_with_default(addr, LISTEN_ANY)
}

/// Resolve an address to dial
pub fn resolve_target_addr(addr: &str) -> Result<SocketAddr> {
    resolve_with_default(addr, DIAL_LOCAL)
}

/// Split `host:port` into its parts, stripping brackets from IPv6 hosts
pub(crate) fn split_host_port(addr: &str) -> Result<(&str, &str)> {
    let addr = addr.trim();
    let (host, port) = addr.rsplit_once(':').ok_or_else(|| ProxyError::Resolution {
        addr: addr.to_string(),
        reason: "missing port, expected host:port".to_string(),
    })?;

    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);

    Ok((host, port))
}

fn resolve_with_default(addr: &str, default_host: IpAddr) -> Result<SocketAddr> {
    let trimmed = addr.trim();

    if let Ok(socket_addr) = SocketAddr::from_str(trimmed) {
        return Ok(socket_addr);
    }

    let (host, port_str) = split_host_port(trimmed)?;
    let port = port_str.parse::<u16>().map_err(|e| ProxyError::Resolution {
        addr: trimmed.to_string(),
        reason: format!("invalid port '{}': {}", port_str, e),
    })?;

    if host.is_empty() {
        return Ok(SocketAddr::new(default_host, port));
    }

    debug!("Resolving host name {}", host);

    let mut addrs = (host, port).to_socket_addrs().map_err(|e| ProxyError::Resolution {
        addr: trimmed.to_string(),
        reason: e.to_string(),
    })?;

    addrs.next().ok_or_else(|| ProxyError::Resolution {
        addr: trimmed.to_string(),
        reason: "host resolved to no addresses".to_string(),
    })
}
