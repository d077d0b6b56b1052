pub mod acceptor;
pub mod policies;

use std::sync::Arc;

use tokio_rustls::rustls::sign::CertifiedKey;

use crate::config::Protocol;
use crate::error::Result;

pub use acceptor::{load_certified_key, load_certs, load_key};
pub use policies::ConnectionPolicies;

/// Contract with the external certificate-management subsystem.
///
/// Phase 2 of automatic HTTPS hands the accumulated domain inventory to
/// `provision`; at handshake time, policies without a static certificate ask
/// `resolve` for one.
pub trait CertManager: Send + Sync {
    fn provision(&self, domains: &[String]) -> Result<()>;

    fn resolve(&self, server_name: &str) -> Option<Arc<CertifiedKey>>;
}

/// Manager that provisions nothing and resolves nothing. Servers relying on
/// it must carry static certificates in their connection policies.
#[derive(Debug, Default)]
pub struct NoopCertManager;

impl CertManager for NoopCertManager {
    fn provision(&self, _domains: &[String]) -> Result<()> {
        Ok(())
    }

    fn resolve(&self, _server_name: &str) -> Option<Arc<CertifiedKey>> {
        None
    }
}

/// ALPN identifiers advertised for a listener's protocol set. H2 is offered
/// before HTTP/1.1 so capable clients prefer it.
pub fn alpn_for_protocols(protocols: &[Protocol]) -> Vec<Vec<u8>> {
    let mut alpn = Vec::new();
    if protocols.contains(&Protocol::H2) {
        alpn.push(b"h2".to_vec());
    }
    if protocols.contains(&Protocol::H1) {
        alpn.push(b"http/1.1".to_vec());
    }
    alpn
}
