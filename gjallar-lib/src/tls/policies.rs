use std::fmt;
use std::sync::Arc;

use tokio_rustls::rustls::server::{ClientHello, ResolvesServerCert, WebPkiClientVerifier};
use tokio_rustls::rustls::sign::CertifiedKey;
use tokio_rustls::rustls::{RootCertStore, ServerConfig};

use super::acceptor::{load_certified_key, load_certs};
use super::CertManager;
use crate::config::{ClientAuth, ConnectionPolicy};
use crate::error::{AppError, Result};
use crate::routes::host_matches;

struct ProvisionedPolicy {
    match_sni: Vec<String>,
    cert: Option<Arc<CertifiedKey>>,
    client_auth: ClientAuth,
    alpn_override: Vec<Vec<u8>>,
    default_sni: Option<String>,
}

/// The provisioned TLS connection-policy set of one server.
///
/// Policies are consulted in order; the first whose SNI matcher covers the
/// handshake selects the certificate. The consolidated rustls config carries
/// the union of the policies' requirements (client auth is all-or-nothing at
/// the listener level).
pub struct ConnectionPolicies {
    policies: Vec<ProvisionedPolicy>,
}

impl ConnectionPolicies {
    pub fn provision(cfgs: &[ConnectionPolicy]) -> Result<Self> {
        let mut policies = Vec::with_capacity(cfgs.len());
        for cfg in cfgs {
            let cert = cfg.certificate.as_ref().map(load_certified_key).transpose()?;
            policies.push(ProvisionedPolicy {
                match_sni: cfg.match_sni.iter().map(|s| s.to_ascii_lowercase()).collect(),
                cert,
                client_auth: cfg.client_auth.clone(),
                alpn_override: cfg.alpn.iter().map(|s| s.as_bytes().to_vec()).collect(),
                default_sni: cfg.default_sni.clone(),
            });
        }
        Ok(Self { policies })
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// True when any policy requires client certificates; drives the
    /// strict-SNI-host default
    pub fn requires_client_auth(&self) -> bool {
        self.policies.iter().any(|p| p.client_auth.is_required())
    }

    /// Consolidated server-level rustls config. `alpn` is the identifier
    /// list derived from the listener's protocol set; a policy-level ALPN
    /// override wins.
    pub fn build_server_config(
        &self,
        alpn: Vec<Vec<u8>>,
        cert_manager: Arc<dyn CertManager>,
    ) -> Result<ServerConfig> {
        let builder = ServerConfig::builder();

        let ca_path = self.policies.iter().find_map(|p| match &p.client_auth {
            ClientAuth::Required { ca_cert_path } => Some(ca_cert_path.clone()),
            ClientAuth::Disabled => None,
        });
        let builder = match ca_path {
            Some(path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(&path)? {
                    roots.add(cert).map_err(|e| {
                        AppError::TlsProvision(format!("Invalid client CA certificate: {e}"))
                    })?;
                }
                let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                    .build()
                    .map_err(|e| {
                        AppError::TlsProvision(format!("Failed to build client verifier: {e}"))
                    })?;
                builder.with_client_cert_verifier(verifier)
            }
            None => builder.with_no_client_auth(),
        };

        let resolver = SniResolver {
            policies: self
                .policies
                .iter()
                .map(|p| ResolverPolicy {
                    match_sni: p.match_sni.clone(),
                    cert: p.cert.clone(),
                    default_sni: p.default_sni.clone(),
                })
                .collect(),
            cert_manager,
        };
        let mut config = builder.with_cert_resolver(Arc::new(resolver));

        let override_alpn = self
            .policies
            .iter()
            .find(|p| !p.alpn_override.is_empty())
            .map(|p| p.alpn_override.clone());
        config.alpn_protocols = override_alpn.unwrap_or(alpn);

        Ok(config)
    }
}

struct ResolverPolicy {
    match_sni: Vec<String>,
    cert: Option<Arc<CertifiedKey>>,
    default_sni: Option<String>,
}

struct SniResolver {
    policies: Vec<ResolverPolicy>,
    cert_manager: Arc<dyn CertManager>,
}

impl fmt::Debug for SniResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SniResolver")
            .field("policies", &self.policies.len())
            .finish()
    }
}

impl ResolvesServerCert for SniResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let presented = client_hello.server_name().map(|s| s.to_ascii_lowercase());
        for policy in &self.policies {
            let effective = presented.clone().or_else(|| policy.default_sni.clone());
            let matched = policy.match_sni.is_empty()
                || effective
                    .as_deref()
                    .is_some_and(|name| policy.match_sni.iter().any(|m| host_matches(m, name)));
            if !matched {
                continue;
            }
            if let Some(cert) = &policy.cert {
                return Some(cert.clone());
            }
            if let Some(name) = &effective {
                if let Some(cert) = self.cert_manager.resolve(name) {
                    return Some(cert);
                }
            }
        }
        None
    }
}
