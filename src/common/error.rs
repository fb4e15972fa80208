//! Error handling module
//!
//! This module defines the error types and result type alias used throughout the relay.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// TCP proxy error type
///
/// `Config`, `Resolution` and `CertificateLoad` are configuration-time errors and
/// stop the process before the listener binds. The remaining variants are scoped
/// to a single session.
#[derive(Error, Debug)]
pub enum ProxyError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// OpenSSL error
    #[error("OpenSSL error: {0}")]
    Ssl(#[from] openssl::error::ErrorStack),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Address could not be parsed or resolved
    #[error("Failed to resolve address {addr}: {reason}")]
    Resolution {
        /// Address as given by the user
        addr: String,
        /// Why resolution failed
        reason: String,
    },

    /// Certificate or private key could not be loaded
    #[error("Certificate error: {0}")]
    CertificateLoad(String),

    /// TLS handshake error
    #[error("TLS handshake error: {0}")]
    TlsHandshake(String),

    /// Upstream could not be reached
    #[error("Failed to connect to {target}: {source}")]
    Dial {
        /// Upstream address
        target: SocketAddr,
        /// Underlying connect failure
        #[source]
        source: io::Error,
    },
}

impl ProxyError {
    /// Whether this error happens at configuration time and must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::Resolution { .. } | Self::CertificateLoad(_)
        )
    }
}

impl From<config::ConfigError> for ProxyError {
    fn from(err: config::ConfigError) -> Self {
        ProxyError::Config(err.to_string())
    }
}

/// Result type alias
///
/// This is a `Result` type alias that uses our custom `ProxyError`.
pub type Result<T> = std::result::Result<T, ProxyError>;
