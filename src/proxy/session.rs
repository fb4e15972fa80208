//! Session module
//!
//! A session pairs one accepted client stream with the upstream stream dialed for it.

use log::{debug, info};
use std::net::SocketAddr;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};

use super::forwarder::{relay, RelayOptions, RelayStats};
use super::traffic::TrafficLogger;

/// One client connection and its upstream connection
///
/// Owns both streams. They are closed together when [`Session::run`] returns.
pub struct Session<C, U> {
    id: u64,
    peer: SocketAddr,
    client: C,
    upstream: U,
}

impl<C, U> Session<C, U>
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Pair an accepted client stream with its upstream stream
    pub fn new(id: u64, peer: SocketAddr, client: C, upstream: U) -> Self {
        Self {
            id,
            peer,
            client,
            upstream,
        }
    }

    /// Session id, unique per server
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Client address
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Relay until both directions finish, then close both streams
    pub async fn run(self, options: RelayOptions, traffic: &TrafficLogger) -> RelayStats {
        let started = Instant::now();
        debug!("[session {}] Relaying for {}", self.id, self.peer);

        let stats = relay(self.client, self.upstream, options, traffic, self.id).await;

        match stats.error {
            Some(ref e) => info!(
                "[session {}] {} closed after error ({}), {} bytes up, {} bytes down, {} ms",
                self.id,
                self.peer,
                e,
                stats.client_to_upstream,
                stats.upstream_to_client,
                started.elapsed().as_millis()
            ),
            None => info!(
                "[session {}] {} closed, {} bytes up, {} bytes down, {} ms",
                self.id,
                self.peer,
                stats.client_to_upstream,
                stats.upstream_to_client,
                started.elapsed().as_millis()
            ),
        }

        stats
    }
}
