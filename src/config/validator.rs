//! Configuration validation
//!
//! Runs before any socket is bound, so bad certificates and addresses are reported at startup.

use log::warn;

use crate::common::{check_file_exists, ProxyError, Result};
use crate::config::defaults::MAX_BUFFER_SIZE;
use crate::config::ProxyConfig;

impl ProxyConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// `ProxyError::Config` for inconsistent settings and `ProxyError::CertificateLoad`
    /// when local TLS is on and the certificate or key file is missing.
    pub fn validate(&self) -> Result<()> {
        self.validate_network_settings()?;
        self.validate_tls_settings()?;
        self.validate_general_settings()?;
        Ok(())
    }

    fn validate_network_settings(&self) -> Result<()> {
        if self.listen.trim().is_empty() {
            return Err(ProxyError::Config("Listen address must not be empty".to_string()));
        }
        if self.target.trim().is_empty() {
            return Err(ProxyError::Config("Target address must not be empty".to_string()));
        }
        Ok(())
    }

    fn validate_tls_settings(&self) -> Result<()> {
        if self.local_tls {
            let cert = self.cert.as_ref().ok_or_else(|| {
                ProxyError::Config("Local TLS requires a certificate file".to_string())
            })?;
            let key = self.key.as_ref().ok_or_else(|| {
                ProxyError::Config("Local TLS requires a private key file".to_string())
            })?;

            check_file_exists(cert, "Certificate")?;
            check_file_exists(key, "Private key")?;
        } else if self.cert.is_some() || self.key.is_some() {
            warn!("Certificate or key given without local TLS enabled, ignoring them");
        }

        if self.remote_tls {
            if self.insecure_skip_verify {
                warn!("Upstream certificate verification is DISABLED. Use this only for testing.");
                if self.remote_ca_cert.is_some() {
                    warn!("Remote CA certificate is ignored when verification is disabled");
                }
            }
            if let Some(ref ca) = self.remote_ca_cert {
                check_file_exists(ca, "Remote CA certificate")?;
            }
        } else if self.insecure_skip_verify || self.remote_ca_cert.is_some() {
            warn!("Remote TLS options given without remote TLS enabled, ignoring them");
        }

        Ok(())
    }

    fn validate_general_settings(&self) -> Result<()> {
        match self.log_level.to_lowercase().as_str() {
            "error" | "warn" | "info" | "debug" | "trace" | "off" => {}
            level => {
                warn!("Unknown log level: {}. env_logger will treat it as a filter directive", level);
            }
        }

        if self.buffer_size == 0 {
            return Err(ProxyError::Config("Buffer size must be greater than 0".to_string()));
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ProxyError::Config(format!(
                "Buffer size {} exceeds the maximum of {} bytes",
                self.buffer_size, MAX_BUFFER_SIZE
            )));
        }
        if self.connect_timeout == 0 {
            return Err(ProxyError::Config("Connect timeout must be greater than 0".to_string()));
        }
        if self.handshake_timeout == 0 {
            return Err(ProxyError::Config("Handshake timeout must be greater than 0".to_string()));
        }
        if self.tcp_keepalive == Some(0) {
            return Err(ProxyError::Config("TCP keepalive must be greater than 0 seconds".to_string()));
        }

        Ok(())
    }
}
