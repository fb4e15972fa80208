//! File system helpers

use std::path::Path;

use super::error::{ProxyError, Result};

/// Check that a path exists and is a regular file
///
/// # Errors
///
/// Returns `ProxyError::CertificateLoad` naming `what` when the path is missing or is
/// not a file. Only certificate material is checked this way.
pub fn check_file_exists(path: &Path, what: &str) -> Result<()> {
    if !path.exists() {
        return Err(ProxyError::CertificateLoad(format!(
            "{} not found: {}",
            what,
            path.display()
        )));
    }

    if !path.is_file() {
        return Err(ProxyError::CertificateLoad(format!(
            "{} is not a file: {}",
            what,
            path.display()
        )));
    }

    Ok(())
}
