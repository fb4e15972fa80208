//! tcpproxy: a TCP/TLS relay
//!
//! Accepts client connections on one address and relays each of them, byte for byte,
//! to a fixed upstream. Either side may be wrapped in TLS, and the relayed bytes can be
//! logged as plain text or as a hex dump.
//!
//! # Main Features
//!
//! - One upstream connection per client connection, two copy tasks per session
//! - Half-close propagation, with both sockets of a session closed together
//! - TLS termination towards clients and TLS origination towards the upstream
//! - Non-blocking traffic logging that drops output rather than stalling the relay
//!
//! # Example
//!
//! ```no_run
//! use tcpproxy::{ProxyServer, Result};
//! use tcpproxy::config::ProxyConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = ProxyConfig {
//!         listen: "127.0.0.1:4444".to_string(),
//!         target: "127.0.0.1:8080".to_string(),
//!         ..ProxyConfig::default()
//!     };
//!
//!     let server = ProxyServer::from_config(&config)?;
//!     let handle = server.start().await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     handle.stop().await;
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod common;
pub mod config;
pub mod proxy;
pub mod tls;

// Re-export commonly used structures and functions for convenience
pub use common::{ProxyError, Result};
pub use config::ProxyConfig;
pub use proxy::{LogMode, ProxyServer, ServerHandle, ServerState};
pub use tls::{create_tls_acceptor, create_tls_connector};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
