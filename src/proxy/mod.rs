//! Proxy service module
//!
//! This module implements the relay itself: the accept loop, per-connection setup,
//! bidirectional forwarding and traffic logging.
//!
//! Each accepted connection becomes an independent session task. Sessions share only
//! the immutable server context, so no locking is needed between them.

mod forwarder;
mod handler;
mod server;
mod session;
mod stream;
mod traffic;

pub use forwarder::{relay, Direction, RelayOptions, RelayStats, TransferError};
pub use server::{ProxyServer, ServerHandle, ServerState};
pub use session::Session;
pub use stream::ProxyStream;
pub use traffic::{hex_dump, LogMode, TrafficLogger};
