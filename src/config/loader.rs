//! Configuration loading
//!
//! Sources are layered from lowest to highest priority: built-in defaults, a JSON
//! file, `TCPPROXY_*` environment variables, then explicit command line flags.

use config::{Config, Environment, File, FileFormat};
use log::debug;
use std::path::{Path, PathBuf};

use crate::common::Result;
use crate::config::defaults::ENV_PREFIX;
use crate::config::ProxyConfig;
use crate::proxy::LogMode;

/// Values given explicitly on the command line
///
/// `None` (or `false` for switches) leaves the lower layers untouched.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub listen: Option<String>,
    pub target: Option<String>,
    pub local_tls: bool,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    pub remote_tls: bool,
    pub insecure_skip_verify: bool,
    pub remote_ca_cert: Option<PathBuf>,
    pub remote_server_name: Option<String>,
    pub log_mode: Option<LogMode>,
    pub log_file: Option<PathBuf>,
    pub log_level: Option<String>,
    pub buffer_size: Option<usize>,
    pub connect_timeout: Option<u64>,
    pub no_half_close: bool,
}

impl ProxyConfig {
    /// Load configuration from a JSON file, without environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let config = Config::builder()
            .add_source(File::from(path).format(FileFormat::Json).required(true))
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load configuration from `TCPPROXY_*` environment variables only
    pub fn from_env() -> Result<Self> {
        let config = Config::builder()
            .add_source(env_source())
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load defaults, then the optional file, then the environment
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = config_file {
            debug!("Loading configuration from {}", path.display());
            builder = builder.add_source(File::from(path).format(FileFormat::Json).required(true));
        }

        let config = builder.add_source(env_source()).build()?;
        Ok(config.try_deserialize()?)
    }

    /// Apply explicit command line values on top of this configuration
    pub fn apply_overrides(mut self, cli: &CliOverrides) -> Self {
        if let Some(ref listen) = cli.listen {
            self.listen = listen.clone();
        }
        if let Some(ref target) = cli.target {
            self.target = target.clone();
        }
        if cli.local_tls {
            self.local_tls = true;
        }
        if let Some(ref cert) = cli.cert {
            self.cert = Some(cert.clone());
        }
        if let Some(ref key) = cli.key {
            self.key = Some(key.clone());
        }
        if cli.remote_tls {
            self.remote_tls = true;
        }
        if cli.insecure_skip_verify {
            self.insecure_skip_verify = true;
        }
        if let Some(ref ca) = cli.remote_ca_cert {
            self.remote_ca_cert = Some(ca.clone());
        }
        if let Some(ref name) = cli.remote_server_name {
            self.remote_server_name = Some(name.clone());
        }
        if let Some(mode) = cli.log_mode {
            self.log_mode = mode;
        }
        if let Some(ref file) = cli.log_file {
            self.log_file = Some(file.clone());
        }
        if let Some(ref level) = cli.log_level {
            self.log_level = level.clone();
        }
        if let Some(size) = cli.buffer_size {
            self.buffer_size = size;
        }
        if let Some(secs) = cli.connect_timeout {
            self.connect_timeout = secs;
        }
        if cli.no_half_close {
            self.half_close = false;
        }
        self
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX).try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_only_touch_given_values() {
        let base = ProxyConfig {
            target: "10.0.0.1:80".to_string(),
            buffer_size: 4096,
            ..ProxyConfig::default()
        };

        let cli = CliOverrides {
            listen: Some("127.0.0.1:9000".to_string()),
            log_mode: Some(LogMode::Plain),
            no_half_close: true,
            ..CliOverrides::default()
        };

        let config = base.apply_overrides(&cli);
        assert_eq!(config.listen, "127.0.0.1:9000");
        assert_eq!(config.target, "10.0.0.1:80");
        assert_eq!(config.buffer_size, 4096);
        assert_eq!(config.log_mode, LogMode::Plain);
        assert!(!config.half_close);
        assert!(!config.local_tls);
    }
}
