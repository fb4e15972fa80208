//! Proxy server module
//!
//! Accepts client connections and hands each one to its own session task. The accept
//! loop never waits for a session, so one slow client never delays the next.

use log::{debug, error, info, warn};
use openssl::ssl::SslAcceptor;
use std::fs::OpenOptions;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::common::{Endpoints, ProxyError, Result};
use crate::config::ProxyConfig;
use crate::tls::{create_tls_acceptor, create_tls_connector, RemoteTlsOptions, UpstreamTls};
use super::forwarder::RelayOptions;
use super::handler::handle_connection;
use super::traffic::{LogMode, TrafficLogger};

/// Pause after a failed accept, so descriptor exhaustion does not spin the loop
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Lifecycle of a proxy server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Configured, not yet listening
    Created,
    /// Accept loop running
    Listening,
    /// Listener closed, sessions may still be draining
    Stopped,
}

/// Read-only state shared by the accept loop and every session
pub(crate) struct ServerContext {
    pub(crate) target: SocketAddr,
    pub(crate) acceptor: Option<SslAcceptor>,
    pub(crate) upstream_tls: Option<UpstreamTls>,
    pub(crate) traffic: TrafficLogger,
    pub(crate) relay: RelayOptions,
    pub(crate) connect_timeout: Duration,
    pub(crate) handshake_timeout: Duration,
    pub(crate) keepalive: Option<Duration>,
    next_session: AtomicU64,
    active_sessions: AtomicUsize,
}

/// Proxy server structure
///
/// Relays every accepted client connection to one fixed upstream, with optional TLS on
/// either side. Configure with the `with_*` methods, then call [`ProxyServer::start`].
/// Starting consumes the server, so it can only ever listen once.
///
/// # Example
///
/// ```no_run
/// # use std::net::SocketAddr;
/// # use tcpproxy::ProxyServer;
/// # async fn example() -> tcpproxy::Result<()> {
/// let server = ProxyServer::new(
///     "127.0.0.1:4444".parse::<SocketAddr>().unwrap(),
///     "127.0.0.1:80".parse::<SocketAddr>().unwrap(),
/// );
/// let handle = server.start().await?;
/// println!("Listening on {}", handle.local_addr());
/// handle.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ProxyServer {
    listen_addr: SocketAddr,
    target_addr: SocketAddr,
    acceptor: Option<SslAcceptor>,
    upstream_tls: Option<UpstreamTls>,
    traffic: TrafficLogger,
    relay: RelayOptions,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    keepalive: Option<Duration>,
}

impl ProxyServer {
    /// Create a plain TCP proxy from `listen_addr` to `target_addr`
    pub fn new(listen_addr: impl Into<SocketAddr>, target_addr: impl Into<SocketAddr>) -> Self {
        let defaults = ProxyConfig::default();
        Self {
            listen_addr: listen_addr.into(),
            target_addr: target_addr.into(),
            acceptor: None,
            upstream_tls: None,
            traffic: TrafficLogger::disabled(),
            relay: RelayOptions::from(&defaults),
            connect_timeout: defaults.connect_timeout(),
            handshake_timeout: defaults.handshake_timeout(),
            keepalive: None,
        }
    }

    /// Build a server from validated configuration
    ///
    /// Resolves both endpoints, loads TLS material and opens the traffic log, so every
    /// configuration problem surfaces here, before anything binds. Must be called from
    /// within a Tokio runtime when traffic logging is enabled.
    ///
    /// # Errors
    ///
    /// Configuration, resolution and certificate errors.
    pub fn from_config(config: &ProxyConfig) -> Result<Self> {
        config.validate()?;

        let endpoints = Endpoints::resolve(&config.listen, &config.target)?;
        debug!("Resolved {} -> {}", endpoints.listen, endpoints.target);

        let mut server = Self::new(endpoints.listen, endpoints.target)
            .with_relay_options(RelayOptions::from(config))
            .with_connect_timeout(config.connect_timeout())
            .with_handshake_timeout(config.handshake_timeout())
            .with_tcp_keepalive(config.tcp_keepalive());

        if config.local_tls {
            let (cert, key) = match (config.cert.as_deref(), config.key.as_deref()) {
                (Some(cert), Some(key)) => (cert, key),
                _ => {
                    return Err(ProxyError::Config(
                        "certificate and key file required".to_string(),
                    ))
                }
            };
            server = server.with_local_tls(create_tls_acceptor(cert, key)?);
        }

        if config.remote_tls {
            let options = RemoteTlsOptions {
                server_name: config
                    .remote_server_name
                    .clone()
                    .unwrap_or(endpoints.target_host),
                insecure_skip_verify: config.insecure_skip_verify,
                ca_cert: config.remote_ca_cert.clone(),
            };
            server = server.with_remote_tls(create_tls_connector(&options)?);
        }

        if config.log_mode != LogMode::None {
            let traffic = match config.log_file {
                Some(ref path) => {
                    let file = OpenOptions::new()
                        .create(true)
                        .append(true)
                        .open(path)
                        .map_err(|e| {
                            ProxyError::Config(format!(
                                "Failed to open traffic log {}: {}",
                                path.display(),
                                e
                            ))
                        })?;
                    TrafficLogger::spawn(
                        config.log_mode,
                        tokio::fs::File::from_std(file),
                        config.traffic_queue(),
                    )
                }
                None => TrafficLogger::spawn(config.log_mode, tokio::io::stdout(), config.traffic_queue()),
            };
            server = server.with_traffic_logger(traffic);
        }

        Ok(server)
    }

    /// Terminate TLS on the client side with `acceptor`
    pub fn with_local_tls(mut self, acceptor: SslAcceptor) -> Self {
        self.acceptor = Some(acceptor);
        self
    }

    /// Originate TLS towards the upstream
    pub fn with_remote_tls(mut self, tls: UpstreamTls) -> Self {
        self.upstream_tls = Some(tls);
        self
    }

    /// Record relayed traffic
    pub fn with_traffic_logger(mut self, traffic: TrafficLogger) -> Self {
        self.traffic = traffic;
        self
    }

    /// Relay buffer size and close behaviour
    pub fn with_relay_options(mut self, relay: RelayOptions) -> Self {
        self.relay = relay;
        self
    }

    /// Upstream connect and handshake timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Client TLS handshake timeout
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// TCP keepalive idle time for both sockets of every session
    pub fn with_tcp_keepalive(mut self, keepalive: Option<Duration>) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Upstream every session dials
    pub fn target_addr(&self) -> SocketAddr {
        self.target_addr
    }

    /// Always `Created`: a started server is represented by its [`ServerHandle`]
    pub fn state(&self) -> ServerState {
        ServerState::Created
    }

    /// Bind the listener and start accepting connections
    ///
    /// # Errors
    ///
    /// Returns an error if it cannot bind to the listen address.
    pub async fn start(self) -> Result<ServerHandle> {
        let listener = TcpListener::bind(self.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            "Proxy service started, listening on {} ({}), forwarding to {} ({})",
            local_addr,
            if self.acceptor.is_some() { "tls" } else { "tcp" },
            self.target_addr,
            match self.upstream_tls {
                Some(ref tls) if tls.verifies_peer() => "tls",
                Some(_) => "tls, unverified",
                None => "tcp",
            }
        );

        let context = Arc::new(ServerContext {
            target: self.target_addr,
            acceptor: self.acceptor,
            upstream_tls: self.upstream_tls,
            traffic: self.traffic,
            relay: self.relay,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
            keepalive: self.keepalive,
            next_session: AtomicU64::new(0),
            active_sessions: AtomicUsize::new(0),
        });

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ServerState::Listening);

        let task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&context),
            shutdown_rx,
            state_tx,
        ));

        Ok(ServerHandle {
            local_addr,
            shutdown: shutdown_tx,
            state: state_rx,
            context,
            task,
        })
    }

    /// Start and keep accepting until the process ends
    pub async fn run(self) -> Result<()> {
        let handle = self.start().await?;
        handle.wait().await;
        Ok(())
    }
}

/// Handle to a listening server
///
/// Dropping the handle closes the listener, like [`ServerHandle::stop`] without waiting.
pub struct ServerHandle {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    state: watch::Receiver<ServerState>,
    context: Arc<ServerContext>,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Sessions currently relaying or setting up
    pub fn active_sessions(&self) -> usize {
        self.context.active_sessions.load(Ordering::Acquire)
    }

    /// Sessions accepted since start
    pub fn total_sessions(&self) -> u64 {
        self.context.next_session.load(Ordering::Acquire)
    }

    /// Close the listener and wait for the accept loop to exit
    ///
    /// In-flight sessions are not interrupted.
    pub async fn stop(self) {
        self.shutdown.send_replace(true);
        self.wait().await;
    }

    /// Wait until the accept loop exits, without requesting a stop
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            error!("Accept loop failed: {}", e);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    context: Arc<ServerContext>,
    mut shutdown: watch::Receiver<bool>,
    state: watch::Sender<ServerState>,
) {
    loop {
        tokio::select! {
            biased;
            _ = stopped(&mut shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, client_addr)) => spawn_session(&context, stream, client_addr),
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    if back_off(&mut shutdown, ACCEPT_BACKOFF).await {
                        break;
                    }
                }
            },
        }
    }

    let local_addr = listener.local_addr().ok();
    drop(listener);
    state.send_replace(ServerState::Stopped);

    info!(
        "Listener {} closed, {} sessions still active",
        local_addr.map(|a| a.to_string()).unwrap_or_default(),
        context.active_sessions.load(Ordering::Acquire)
    );
}

/// Sleep for `delay`, returning `true` early if a stop is requested meanwhile
async fn back_off(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = stopped(shutdown) => true,
        _ = tokio::time::sleep(delay) => false,
    }
}

/// Resolves once a stop was requested or the handle was dropped
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

fn spawn_session(context: &Arc<ServerContext>, stream: TcpStream, client_addr: SocketAddr) {
    let id = context.next_session.fetch_add(1, Ordering::AcqRel) + 1;
    context.active_sessions.fetch_add(1, Ordering::AcqRel);
    info!("[session {}] Accepted connection from {}", id, client_addr);

    let context = Arc::clone(context);
    tokio::spawn(async move {
        let _active = ActiveSession(Arc::clone(&context));

        match handle_connection(&context, id, stream, client_addr).await {
            Ok(stats) => {
                if let Some(e) = stats.error {
                    debug!("[session {}] Transfer error: {}", id, e);
                }
            }
            Err(e) => warn!("[session {}] Session from {} aborted: {}", id, client_addr, e),
        }
    });
}

/// Keeps the active session count accurate however the session task ends
struct ActiveSession(Arc<ServerContext>);

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.0.active_sessions.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[tokio::test]
    async fn test_back_off_ends_on_stop() {
        let (tx, mut rx) = watch::channel(false);
        assert!(!back_off(&mut rx, Duration::from_millis(10)).await);

        let stopper = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            tx.send_replace(true);
            tx
        });

        // a stop during a long back-off is seen at once
        let stopped_early = tokio::time::timeout(
            Duration::from_secs(5),
            back_off(&mut rx, Duration::from_secs(3600)),
        )
        .await
        .unwrap();
        assert!(stopped_early);
        drop(stopper.await.unwrap());
    }

    #[test]
    fn test_proxy_new() {
        let proxy = ProxyServer::new(
            "127.0.0.1:8443".parse::<SocketAddr>().unwrap(),
            "127.0.0.1:6000".parse::<SocketAddr>().unwrap(),
        );

        assert_eq!(proxy.listen_addr().port(), 8443);
        assert_eq!(proxy.target_addr().port(), 6000);
        assert_eq!(proxy.state(), ServerState::Created);
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let proxy = ProxyServer::new(
            "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            "127.0.0.1:9".parse::<SocketAddr>().unwrap(),
        );

        let handle = proxy.start().await.unwrap();
        let addr = handle.local_addr();
        assert_ne!(addr.port(), 0);
        assert_eq!(handle.state(), ServerState::Listening);
        assert_eq!(handle.active_sessions(), 0);

        let state = handle.state.clone();
        handle.stop().await;
        assert_eq!(*state.borrow(), ServerState::Stopped);

        // the port is released once stopped
        assert!(TcpStream::connect(addr).await.is_err());
    }

    #[tokio::test]
    async fn test_dial_failure_keeps_listening() {
        // grab a free port and release it so nothing listens there
        let unused = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let dead_target = unused.local_addr().unwrap();
        drop(unused);

        let proxy = ProxyServer::new("127.0.0.1:0".parse::<SocketAddr>().unwrap(), dead_target);
        let handle = proxy.start().await.unwrap();

        for _ in 0..2 {
            let mut client = TcpStream::connect(handle.local_addr()).await.unwrap();
            let mut buf = Vec::new();
            let read = tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut buf))
                .await
                .unwrap();
            // closed by the proxy: clean end-of-stream or a reset
            assert!(read.map(|n| n == 0).unwrap_or(true));
            let _ = client.write_all(b"x").await;
        }

        assert_eq!(handle.state(), ServerState::Listening);
        assert_eq!(handle.total_sessions(), 2);
        handle.stop().await;
    }
}
