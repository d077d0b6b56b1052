use rustls_pki_types::pem::PemObject;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;
use tokio_rustls::rustls::crypto::ring::sign::any_supported_type;
use tokio_rustls::rustls::sign::CertifiedKey;

use crate::config::CertKeyPair;
use crate::error::{AppError, Result};

pub fn load_certs(path: &str) -> Result<Vec<CertificateDer<'static>>> {
    let bytes = std::fs::read(path)
        .map_err(|e| AppError::TlsProvision(format!("Failed to read certificate {path}: {e}")))?;
    let certs = CertificateDer::pem_slice_iter(&bytes)
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| AppError::TlsProvision(format!("Failed to parse certificates {path}: {e}")))?;
    if certs.is_empty() {
        return Err(AppError::TlsProvision(format!("No certificates found in {path}")));
    }
    Ok(certs)
}

pub fn load_key(path: &str) -> Result<PrivateKeyDer<'static>> {
    let bytes = std::fs::read(path)
        .map_err(|e| AppError::TlsProvision(format!("Failed to read key {path}: {e}")))?;
    let mut keys: Vec<PrivateKeyDer<'_>> = PrivateKeyDer::pem_slice_iter(&bytes)
        .collect::<std::result::Result<Vec<_>, rustls_pki_types::pem::Error>>()
        .map_err(|e| AppError::TlsProvision(format!("Failed to parse private key {path}: {e}")))?;
    keys.pop()
        .ok_or_else(|| AppError::TlsProvision(format!("No private key found in {path}")))
}

/// Load a static certificate/key pair into the form the SNI resolver serves
pub fn load_certified_key(pair: &CertKeyPair) -> Result<Arc<CertifiedKey>> {
    let certs = load_certs(&pair.cert_path)?;
    let key = load_key(&pair.key_path)?;
    let signing_key = any_supported_type(&key).map_err(|e| {
        AppError::TlsProvision(format!("Unsupported key type in {}: {e}", pair.key_path))
    })?;
    Ok(Arc::new(CertifiedKey::new(certs, signing_key)))
}
