//! Client-side TLS towards the upstream target

use log::{debug, warn};
use openssl::ssl::{SslConnector, SslMethod, SslVerifyMode};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::common::{check_file_exists, ProxyError, Result};

/// Options for TLS towards the upstream
#[derive(Debug, Clone, Default)]
pub struct RemoteTlsOptions {
    /// Name sent as SNI and verified against the upstream certificate
    pub server_name: String,
    /// Skip every certificate check. Test-only: any upstream is accepted.
    pub insecure_skip_verify: bool,
    /// CA file to trust instead of the system store
    pub ca_cert: Option<PathBuf>,
}

/// Ready-to-use client-side TLS configuration
///
/// Cloning is cheap, the underlying `SslContext` is reference counted.
#[derive(Clone)]
pub struct UpstreamTls {
    connector: SslConnector,
    server_name: String,
    verify: bool,
}

impl fmt::Debug for UpstreamTls {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpstreamTls")
            .field("connector", &"<SslConnector>")
            .field("server_name", &self.server_name)
            .field("verify", &self.verify)
            .finish()
    }
}

impl UpstreamTls {
    /// Server name used for SNI and verification
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Whether the upstream certificate is verified
    pub fn verifies_peer(&self) -> bool {
        self.verify
    }

    /// Run the TLS client handshake over an established TCP stream
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::TlsHandshake` when negotiation or verification fails.
    pub async fn connect(&self, stream: TcpStream) -> Result<SslStream<TcpStream>> {
        let mut config = self.connector.configure()?;
        if !self.verify {
            config.set_verify_hostname(false);
        }
        let ssl = config.into_ssl(&self.server_name)?;

        let mut stream = SslStream::new(ssl, stream)?;
        Pin::new(&mut stream)
            .connect()
            .await
            .map_err(|e| ProxyError::TlsHandshake(format!("upstream {}: {}", self.server_name, e)))?;

        debug!(
            "Upstream TLS established with {} ({})",
            self.server_name,
            stream.ssl().version_str()
        );
        Ok(stream)
    }
}

/// Create the client-side TLS configuration for dialing the upstream
///
/// # Errors
///
/// Returns `ProxyError::CertificateLoad` if the CA file is missing or invalid.
pub fn create_tls_connector(options: &RemoteTlsOptions) -> Result<UpstreamTls> {
    let mut builder = SslConnector::builder(SslMethod::tls())?;

    if options.insecure_skip_verify {
        warn!(
            "Upstream TLS verification disabled for {}: any certificate will be accepted. Do not use in production.",
            options.server_name
        );
        builder.set_verify(SslVerifyMode::NONE);
    } else if let Some(ref ca) = options.ca_cert {
        check_file_exists(ca, "Remote CA certificate")?;
        builder.set_ca_file(ca).map_err(|e| {
            ProxyError::CertificateLoad(format!("failed to load CA file {}: {}", ca.display(), e))
        })?;
        debug!("Verifying upstream against CA file {}", ca.display());
    }

    Ok(UpstreamTls {
        connector: builder.build(),
        server_name: options.server_name.clone(),
        verify: !options.insecure_skip_verify,
    })
}
