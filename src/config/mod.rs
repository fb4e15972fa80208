//! Configuration module
//!
//! This module handles application configuration: loading from a JSON file, environment
//! variables and command line overrides, and validating the result before anything binds.

mod defaults;
mod loader;
mod validator;

pub use self::defaults::{ENV_PREFIX, LISTEN_STR, LOG_LEVEL_STR, MAX_BUFFER_SIZE, TARGET_STR};
pub use self::loader::CliOverrides;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::proxy::LogMode;

/// Proxy configuration
///
/// Every field has a default, so partial files and environments are accepted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
#[serde(default)]
pub struct ProxyConfig {
    // --- Network settings ---

    /// Listen address (`host:port`, `:port` for every interface)
    pub listen: String,

    /// Upstream address every session dials (`host:port`, `:port` for loopback)
    pub target: String,

    // --- Local (client facing) TLS ---

    /// Terminate TLS on the client side
    pub local_tls: bool,

    /// PEM certificate chain for the client side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// PEM private key for the client side
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    // --- Remote (upstream) TLS ---

    /// Originate TLS towards the upstream
    pub remote_tls: bool,

    /// Accept any upstream certificate. For testing against self-signed upstreams only.
    pub insecure_skip_verify: bool,

    /// CA file used to verify the upstream instead of the system trust store
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ca_cert: Option<PathBuf>,

    /// Server name sent as SNI and verified against the upstream certificate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_server_name: Option<String>,

    // --- Logging ---

    /// Traffic log mode (none, plain, hex)
    pub log_mode: LogMode,

    /// Traffic log destination. Standard output when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,

    /// Diagnostic log level (error, warn, info, debug, trace)
    pub log_level: String,

    // --- Relay tuning ---

    /// Relay buffer size per direction, in bytes
    pub buffer_size: usize,

    /// Upstream connect and handshake timeout, in seconds
    pub connect_timeout: u64,

    /// Client TLS handshake timeout, in seconds
    pub handshake_timeout: u64,

    /// Half-close the peer when one side finishes sending, instead of closing both
    pub half_close: bool,

    /// Idle seconds before TCP keepalive probes start. Keepalive is off when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tcp_keepalive: Option<u64>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen: defaults::listen(),
            target: defaults::target(),
            local_tls: false,
            cert: None,
            key: None,
            remote_tls: false,
            insecure_skip_verify: false,
            remote_ca_cert: None,
            remote_server_name: None,
            log_mode: LogMode::None,
            log_file: None,
            log_level: defaults::log_level(),
            buffer_size: defaults::buffer_size(),
            connect_timeout: defaults::connect_timeout(),
            handshake_timeout: defaults::handshake_timeout(),
            half_close: defaults::half_close(),
            tcp_keepalive: None,
        }
    }
}

impl ProxyConfig {
    /// Upstream connect timeout
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout)
    }

    /// Client TLS handshake timeout
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout)
    }

    /// TCP keepalive idle time, if enabled
    pub fn tcp_keepalive(&self) -> Option<Duration> {
        self.tcp_keepalive.map(Duration::from_secs)
    }

    /// Capacity of the traffic log queue
    pub fn traffic_queue(&self) -> usize {
        defaults::traffic_queue()
    }
}

/// Log the configuration
pub fn log_config(config: &ProxyConfig) {
    use log::info;

    if !log::log_enabled!(log::Level::Info) {
        return;
    }

    info!("=== Final Configuration ===");
    info!("  Listen address: {}", config.listen);
    info!("  Target address: {}", config.target);

    if config.local_tls {
        let show = |p: &Option<PathBuf>| {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<unset>".to_string())
        };
        info!("  Local TLS: certificate {}, key {}", show(&config.cert), show(&config.key));
    } else {
        info!("  Local TLS: disabled");
    }

    if config.remote_tls {
        info!(
            "  Remote TLS: enabled (verification {})",
            if config.insecure_skip_verify { "DISABLED" } else { "on" }
        );
        if let Some(ref ca) = config.remote_ca_cert {
            info!("  Remote CA certificate: {}", ca.display());
        }
        if let Some(ref name) = config.remote_server_name {
            info!("  Remote server name: {}", name);
        }
    } else {
        info!("  Remote TLS: disabled");
    }

    info!("  Traffic log mode: {}", config.log_mode);
    if let Some(ref file) = config.log_file {
        info!("  Traffic log file: {}", file.display());
    }
    info!("  Buffer size: {} bytes", config.buffer_size);
    info!("  Connect timeout: {} seconds", config.connect_timeout);
    info!("  Half close: {}", config.half_close);
    if let Some(secs) = config.tcp_keepalive {
        info!("  TCP keepalive: {} seconds", secs);
    }
    info!("=========================");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen, ":4444");
        assert_eq!(config.target, ":80");
        assert_eq!(config.log_mode, LogMode::None);
        assert_eq!(config.buffer_size, 8192);
        assert!(config.half_close);
        assert!(config.tcp_keepalive().is_none());
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ProxyConfig = serde_json::from_str(
            r#"{ "target": "127.0.0.1:6000", "log_mode": "HEX", "tcp_keepalive": 60 }"#,
        )
        .unwrap();

        assert_eq!(config.target, "127.0.0.1:6000");
        assert_eq!(config.listen, ":4444");
        assert_eq!(config.log_mode, LogMode::Hex);
        assert_eq!(config.tcp_keepalive(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: std::result::Result<ProxyConfig, _> =
            serde_json::from_str(r#"{ "targett": "127.0.0.1:6000" }"#);
        assert!(result.is_err());
    }
}
