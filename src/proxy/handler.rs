//! Connection handler module
//!
//! Takes one accepted client connection through client TLS, upstream dial, upstream TLS
//! and the relay. Every failure here ends only this session.

use log::{debug, warn};
use socket2::{SockRef, TcpKeepalive};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::common::{ProxyError, Result};
use crate::tls::accept_tls;
use super::forwarder::RelayStats;
use super::server::ServerContext;
use super::session::Session;
use super::stream::ProxyStream;

/// Handle a single client connection
///
/// # Errors
///
/// `ProxyError::TlsHandshake` if either handshake fails or times out,
/// `ProxyError::Dial` if the upstream cannot be reached in time.
pub(crate) async fn handle_connection(
    context: &ServerContext,
    id: u64,
    client_stream: TcpStream,
    client_addr: SocketAddr,
) -> Result<RelayStats> {
    configure_socket(&client_stream, context.keepalive);

    let client: ProxyStream = match context.acceptor {
        Some(ref acceptor) => timeout(context.handshake_timeout, accept_tls(acceptor, client_stream))
            .await
            .map_err(|_| ProxyError::TlsHandshake("client handshake timed out".to_string()))??
            .into(),
        None => client_stream.into(),
    };

    debug!("[session {}] Dialing {}", id, context.target);

    let upstream_stream = timeout(context.connect_timeout, TcpStream::connect(context.target))
        .await
        .map_err(|_| ProxyError::Dial {
            target: context.target,
            source: io::Error::new(io::ErrorKind::TimedOut, "connection timed out"),
        })?
        .map_err(|e| ProxyError::Dial {
            target: context.target,
            source: e,
        })?;

    configure_socket(&upstream_stream, context.keepalive);

    let upstream: ProxyStream = match context.upstream_tls {
        Some(ref tls) => timeout(context.connect_timeout, tls.connect(upstream_stream))
            .await
            .map_err(|_| ProxyError::TlsHandshake("upstream handshake timed out".to_string()))??
            .into(),
        None => upstream_stream.into(),
    };

    debug!(
        "[session {}] Connected {} ({}) -> {} ({})",
        id,
        client_addr,
        if client.is_tls() { "tls" } else { "tcp" },
        context.target,
        if upstream.is_tls() { "tls" } else { "tcp" }
    );

    let session = Session::new(id, client_addr, client, upstream);
    Ok(session.run(context.relay, &context.traffic).await)
}

/// Apply TCP_NODELAY and, when configured, keepalive
fn configure_socket(stream: &TcpStream, keepalive: Option<Duration>) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("Failed to set TCP_NODELAY: {}", e);
    }

    if let Some(idle) = keepalive {
        let keepalive = TcpKeepalive::new().with_time(idle);
        if let Err(e) = SockRef::from(stream).set_tcp_keepalive(&keepalive) {
            warn!("Failed to enable TCP keepalive: {}", e);
        }
    }
}
