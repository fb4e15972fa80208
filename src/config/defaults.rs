//! Default configuration values
//!
//! Single source of truth for defaults, shared by serde, the CLI and tests.

/// Environment variable prefix for all configuration options
pub const ENV_PREFIX: &str = "TCPPROXY";

/// Default listen address as string
pub const LISTEN_STR: &str = ":4444";

/// Default target address as string
pub const TARGET_STR: &str = ":80";

/// Default log level as string
pub const LOG_LEVEL_STR: &str = "info";

/// Default listen address
pub fn listen() -> String {
    LISTEN_STR.to_string()
}

/// Default target address
pub fn target() -> String {
    TARGET_STR.to_string()
}

/// Default log level
pub fn log_level() -> String {
    LOG_LEVEL_STR.to_string()
}

/// Largest accepted relay buffer per direction (4MB)
pub const MAX_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Default relay buffer size per direction (8KB)
pub fn buffer_size() -> usize {
    8192
}

/// Default upstream connect timeout in seconds
pub fn connect_timeout() -> u64 {
    30
}

/// Default client TLS handshake timeout in seconds
pub fn handshake_timeout() -> u64 {
    10
}

/// Half-close is on unless disabled
pub fn half_close() -> bool {
    true
}

/// Capacity of the traffic log queue, in chunks
pub fn traffic_queue() -> usize {
    1024
}
