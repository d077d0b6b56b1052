use serde::Deserialize;

/// Client authentication mode for mTLS
#[derive(Debug, Deserialize, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuth {
    /// Client authentication is disabled (default)
    #[default]
    Disabled,
    /// Clients must present valid certificates signed by the specified CA
    Required {
        /// Path to client CA certificate file (PEM format)
        ca_cert_path: String,
    },
}

impl ClientAuth {
    pub fn is_required(&self) -> bool {
        matches!(self, ClientAuth::Required { .. })
    }
}

/// A certificate/key pair on disk, PEM encoded
#[derive(Debug, Deserialize, Clone)]
pub struct CertKeyPair {
    pub cert_path: String,
    pub key_path: String,
}

/// One TLS connection policy
///
/// Policies are evaluated in order; the first whose SNI matcher matches the
/// handshake selects the certificate and client-auth requirements. A policy
/// with an empty matcher matches every handshake.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ConnectionPolicy {
    /// SNI names this policy applies to; empty matches all
    #[serde(default)]
    pub match_sni: Vec<String>,
    /// Static certificate for this policy. When absent, the certificate
    /// manager collaborator resolves one at handshake time.
    #[serde(default)]
    pub certificate: Option<CertKeyPair>,
    /// ALPN protocol override; empty derives ALPN from the listener's
    /// protocol set
    #[serde(default)]
    pub alpn: Vec<String>,
    /// Client authentication mode
    #[serde(default)]
    pub client_auth: ClientAuth,
    /// SNI assumed for clients that send none
    #[serde(default)]
    pub default_sni: Option<String>,
}
