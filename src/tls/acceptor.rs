//! Server-side TLS identity for the client facing listener

use log::{debug, info};
use openssl::ssl::{Ssl, SslAcceptor, SslFiletype, SslMethod};
use std::path::Path;
use std::pin::Pin;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;

use crate::common::{check_file_exists, ProxyError, Result};

/// Create a TLS acceptor from a PEM certificate chain and private key
///
/// Both files are checked and loaded eagerly, so a broken identity is reported
/// before the listener binds rather than on the first handshake.
///
/// # Example
///
/// ```no_run
/// # use std::path::Path;
/// # use tcpproxy::tls::create_tls_acceptor;
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let acceptor = create_tls_acceptor(
///     Path::new("certs/server.crt"),
///     Path::new("certs/server.key"),
/// )?;
/// # Ok(())
/// # }
/// ```
///
/// # Errors
///
/// Returns `ProxyError::CertificateLoad` if either file is missing, unreadable, or the
/// key does not match the certificate.
pub fn create_tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<SslAcceptor> {
    check_file_exists(cert_path, "Certificate")?;
    check_file_exists(key_path, "Private key")?;

    let mut acceptor = SslAcceptor::mozilla_intermediate_v5(SslMethod::tls())?;

    acceptor
        .set_certificate_chain_file(cert_path)
        .map_err(|e| load_error("certificate", cert_path, e))?;
    acceptor
        .set_private_key_file(key_path, SslFiletype::PEM)
        .map_err(|e| load_error("private key", key_path, e))?;
    acceptor.check_private_key().map_err(|e| {
        ProxyError::CertificateLoad(format!(
            "private key {} does not match certificate {}: {}",
            key_path.display(),
            cert_path.display(),
            e
        ))
    })?;

    debug!("Loaded certificate {} and key {}", cert_path.display(), key_path.display());
    info!("Client-side TLS enabled");

    Ok(acceptor.build())
}

/// Run the TLS server handshake on an accepted client stream
///
/// # Errors
///
/// Returns `ProxyError::TlsHandshake` when the client fails to negotiate.
pub async fn accept_tls(acceptor: &SslAcceptor, stream: TcpStream) -> Result<SslStream<TcpStream>> {
    let ssl = Ssl::new(acceptor.context())?;
    let mut stream = SslStream::new(ssl, stream)?;

    Pin::new(&mut stream)
        .accept()
        .await
        .map_err(|e| ProxyError::TlsHandshake(format!("client: {}", e)))?;

    debug!("Client TLS established ({})", stream.ssl().version_str());
    Ok(stream)
}

fn load_error(what: &str, path: &Path, err: openssl::error::ErrorStack) -> ProxyError {
    ProxyError::CertificateLoad(format!("failed to load {} {}: {}", what, path.display(), err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_files() {
        let result = create_tls_acceptor(Path::new("missing.crt"), Path::new("missing.key"));
        assert!(matches!(result, Err(ProxyError::CertificateLoad(_))));
    }

    #[test]
    fn test_garbage_certificate() {
        let dir = tempfile::tempdir().unwrap();
        let cert = dir.path().join("server.crt");
        let key = dir.path().join("server.key");
        std::fs::File::create(&cert).unwrap().write_all(b"not a certificate").unwrap();
        std::fs::File::create(&key).unwrap().write_all(b"not a key").unwrap();

        let err = create_tls_acceptor(&cert, &key).err().expect("expected certificate load error");
        assert!(matches!(err, ProxyError::CertificateLoad(_)));
        assert!(err.to_string().contains("server.crt"));
    }
}
