//! TLS handling module
//!
//! Server-side identity for the client facing listener, client-side configuration for
//! the upstream, and certificate inspection helpers.

mod acceptor;
mod cert;
mod connector;

pub use acceptor::{accept_tls, create_tls_acceptor};
pub use cert::{get_cert_common_name, get_cert_fingerprint, get_cert_subject, load_cert};
pub use connector::{create_tls_connector, RemoteTlsOptions, UpstreamTls};
