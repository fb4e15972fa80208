//! Certificate inspection
//!
//! Used at startup to log which identity the listener presents.

use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::x509::X509;
use std::fs;
use std::path::Path;

use crate::common::{ProxyError, Result};

/// Load the first certificate from a PEM file
pub fn load_cert(cert_path: &Path) -> Result<X509> {
    let pem = fs::read(cert_path).map_err(|e| {
        ProxyError::CertificateLoad(format!("failed to read {}: {}", cert_path.display(), e))
    })?;

    X509::from_pem(&pem).map_err(|e| {
        ProxyError::CertificateLoad(format!("failed to parse {}: {}", cert_path.display(), e))
    })
}

/// Get the certificate subject as `KEY=value` pairs joined by `, `
pub fn get_cert_subject(cert_path: &Path) -> Result<String> {
    let cert = load_cert(cert_path)?;

    let parts: Vec<String> = cert
        .subject_name()
        .entries()
        .map(|entry| {
            let key = entry
                .object()
                .nid()
                .short_name()
                .unwrap_or("?")
                .to_string();
            let value = entry
                .data()
                .as_utf8()
                .map(|v| v.to_string())
                .unwrap_or_default();
            format!("{}={}", key, value)
        })
        .collect();

    Ok(parts.join(", "))
}

/// Get the SHA-256 fingerprint as colon separated upper case hex
pub fn get_cert_fingerprint(cert_path: &Path) -> Result<String> {
    let cert = load_cert(cert_path)?;
    let digest = cert.digest(MessageDigest::sha256())?;

    Ok(digest
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(":"))
}

/// Get the certificate common name, if any
pub fn get_cert_common_name(cert_path: &Path) -> Result<Option<String>> {
    let cert = load_cert(cert_path)?;
    let cn = cert
        .subject_name()
        .entries_by_nid(Nid::COMMONNAME)
        .next()
        .and_then(|entry| entry.data().as_utf8().ok())
        .map(|v| v.to_string());
    Ok(cn)
}
