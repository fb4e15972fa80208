//! Data forwarding module
//!
//! Copies bytes between two duplex streams in both directions at once. Each direction
//! runs in its own task with one reusable buffer. End-of-stream on a source half-closes
//! the matching destination; an I/O error on either side aborts both directions. The
//! streams are dropped only after both tasks have finished, so a session's two sockets
//! always close together.

use log::{debug, error};
use std::fmt;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::traffic::TrafficLogger;
use crate::config::{ProxyConfig, MAX_BUFFER_SIZE};

/// Direction of a one-way copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Bytes sent by the client towards the upstream
    ClientToUpstream,
    /// Bytes sent by the upstream towards the client
    UpstreamToClient,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ClientToUpstream => write!(f, "client -> upstream"),
            Self::UpstreamToClient => write!(f, "upstream -> client"),
        }
    }
}

/// Relay tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Buffer size per direction, in bytes
    pub buffer_size: usize,
    /// Half-close the destination on end-of-stream instead of ending the whole relay
    pub half_close: bool,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            buffer_size: 8192,
            half_close: true,
        }
    }
}

impl From<&ProxyConfig> for RelayOptions {
    fn from(config: &ProxyConfig) -> Self {
        Self {
            buffer_size: config.buffer_size.clamp(1, MAX_BUFFER_SIZE),
            half_close: config.half_close,
        }
    }
}

/// I/O failure that ended a relay early
#[derive(Debug)]
pub struct TransferError {
    /// Direction that failed
    pub direction: Direction,
    /// Underlying error
    pub source: io::Error,
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.direction, self.source)
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// Result of a finished relay
#[derive(Debug, Default)]
pub struct RelayStats {
    /// Bytes written to the upstream
    pub client_to_upstream: u64,
    /// Bytes written to the client
    pub upstream_to_client: u64,
    /// First transfer error, if the relay did not end cleanly
    pub error: Option<TransferError>,
}

impl RelayStats {
    /// Total bytes relayed in both directions
    pub fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }
}

enum DirectionEnd {
    Eof,
    Aborted,
    Failed(io::Error),
}

struct DirectionReport {
    direction: Direction,
    bytes: u64,
    error: Option<io::Error>,
}

/// Relay bytes between `client` and `upstream` until both directions finish
///
/// Never panics on I/O failure: errors end the relay and are returned in
/// [`RelayStats::error`]. Both streams are closed when this returns.
pub async fn relay<C, U>(
    client: C,
    upstream: U,
    options: RelayOptions,
    traffic: &TrafficLogger,
    session: u64,
) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    U: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (client_reader, client_writer) = tokio::io::split(client);
    let (upstream_reader, upstream_writer) = tokio::io::split(upstream);

    let (abort_tx, abort_rx) = watch::channel(false);
    let abort_tx = Arc::new(abort_tx);

    let client_to_upstream = tokio::spawn(copy_direction(
        session,
        Direction::ClientToUpstream,
        client_reader,
        upstream_writer,
        options,
        traffic.clone(),
        Arc::clone(&abort_tx),
        abort_rx.clone(),
    ));

    let upstream_to_client = tokio::spawn(copy_direction(
        session,
        Direction::UpstreamToClient,
        upstream_reader,
        client_writer,
        options,
        traffic.clone(),
        Arc::clone(&abort_tx),
        abort_rx,
    ));

    let (first, second) = tokio::join!(
        finish(session, client_to_upstream, &abort_tx),
        finish(session, upstream_to_client, &abort_tx),
    );

    let mut stats = RelayStats::default();
    for report in [first, second].into_iter().flatten() {
        match report.direction {
            Direction::ClientToUpstream => stats.client_to_upstream = report.bytes,
            Direction::UpstreamToClient => stats.upstream_to_client = report.bytes,
        }
        if stats.error.is_none() {
            if let Some(source) = report.error {
                stats.error = Some(TransferError {
                    direction: report.direction,
                    source,
                });
            }
        }
    }

    stats
}

/// Wait for a copy task, aborting its peer if the task died
async fn finish(
    session: u64,
    handle: JoinHandle<DirectionReport>,
    abort: &watch::Sender<bool>,
) -> Option<DirectionReport> {
    match handle.await {
        Ok(report) => Some(report),
        Err(e) => {
            error!("[session {}] Copy task failed: {}", session, e);
            abort.send_replace(true);
            None
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn copy_direction<R, W>(
    session: u64,
    direction: Direction,
    mut reader: R,
    mut writer: W,
    options: RelayOptions,
    traffic: TrafficLogger,
    abort_tx: Arc<watch::Sender<bool>>,
    mut abort_rx: watch::Receiver<bool>,
) -> DirectionReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buffer = vec![0u8; options.buffer_size.clamp(1, MAX_BUFFER_SIZE)];
    let mut bytes = 0u64;

    let end = loop {
        let read = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => break DirectionEnd::Aborted,
            read = reader.read(&mut buffer) => read,
        };

        let n = match read {
            Ok(0) => break DirectionEnd::Eof,
            Ok(n) => n,
            Err(e) => break DirectionEnd::Failed(e),
        };

        let written = tokio::select! {
            biased;
            _ = aborted(&mut abort_rx) => break DirectionEnd::Aborted,
            written = writer.write_all(&buffer[..n]) => written,
        };

        if let Err(e) = written {
            break DirectionEnd::Failed(e);
        }
        traffic.observe(session, direction, &buffer[..n]);
        bytes += n as u64;
    };

    let error = match end {
        DirectionEnd::Eof if options.half_close => {
            debug!("[session {}] {} reached end of stream, half-closing", session, direction);
            let shutdown = tokio::select! {
                biased;
                _ = aborted(&mut abort_rx) => Ok(()),
                shutdown = writer.shutdown() => shutdown,
            };
            match shutdown {
                Ok(()) => None,
                Err(e) => {
                    abort_tx.send_replace(true);
                    Some(e)
                }
            }
        }
        DirectionEnd::Eof => {
            debug!("[session {}] {} reached end of stream, closing session", session, direction);
            abort_tx.send_replace(true);
            None
        }
        DirectionEnd::Aborted => {
            debug!("[session {}] {} stopped by peer direction", session, direction);
            None
        }
        DirectionEnd::Failed(e) => {
            debug!("[session {}] {} failed: {}", session, direction, e);
            abort_tx.send_replace(true);
            Some(e)
        }
    };

    debug!("[session {}] {} transferred {} bytes total", session, direction, bytes);

    DirectionReport {
        direction,
        bytes,
        error,
    }
}

/// Resolves once the session has been aborted
async fn aborted(abort: &mut watch::Receiver<bool>) {
    let _ = abort.wait_for(|aborted| *aborted).await;
}
