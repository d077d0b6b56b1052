use serde::Deserialize;
use std::collections::BTreeMap;

use super::metrics::MetricsConfig;
use super::routes::RouteConfig;
use super::timeout::TimeoutConfig;
use super::tls::ConnectionPolicy;

/// Wire protocols a listener may speak
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// HTTP/1.1
    H1,
    /// HTTP/2 over TLS (ALPN negotiated)
    H2,
    /// HTTP/2 over cleartext (prior knowledge or upgrade)
    H2c,
    /// HTTP/3 over QUIC
    H3,
}

impl Protocol {
    pub fn as_str(self) -> &'static str {
        match self {
            Protocol::H1 => "h1",
            Protocol::H2 => "h2",
            Protocol::H2c => "h2c",
            Protocol::H3 => "h3",
        }
    }
}

/// One per-name listener-server
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    /// Addresses to listen on: `[network/]host:port_or_range`
    /// Examples: ":8080", "tcp/127.0.0.1:8000-8002", "unix//run/app.sock"
    pub listen: Vec<String>,
    /// Per-address protocol override, same length as `listen` when present;
    /// a null entry inherits the server-level `protocols`
    #[serde(default)]
    pub listen_protocols: Option<Vec<Option<Vec<Protocol>>>>,
    /// Server-level protocol set
    /// Default: ["h1", "h2", "h3"]
    #[serde(default)]
    pub protocols: Option<Vec<Protocol>>,
    /// Primary route list compiled into the handler chain
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
    /// Error-handling routes, run when the primary chain returns an error
    #[serde(default)]
    pub errors: Vec<RouteConfig>,
    /// Routes compiled and addressable by name
    #[serde(default)]
    pub named_routes: BTreeMap<String, RouteConfig>,
    /// Ordered TLS connection policies; the first policy whose SNI matcher
    /// matches a handshake wins
    #[serde(default)]
    pub tls_connection_policies: Vec<ConnectionPolicy>,
    /// Listener wrapper chain; the `tls` entry is a placeholder marking
    /// where TLS termination is inserted
    #[serde(default)]
    pub listener_wrappers: Vec<ListenerWrapperConfig>,
    /// Reject requests whose Host header does not match the TLS SNI with
    /// 421 Misdirected Request
    /// Default: unset; forced on when any policy requires client certificates
    #[serde(default)]
    pub strict_sni_host: Option<bool>,
    /// Transport timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// CIDR ranges whose peers are trusted to supply client-IP headers
    #[serde(default)]
    pub trusted_proxies: Vec<String>,
    /// Headers consulted (in order) for the real client IP when the peer
    /// is a trusted proxy
    /// Default: ["X-Forwarded-For"]
    #[serde(default = "default_client_ip_headers")]
    pub client_ip_headers: Vec<String>,
    /// Access-log scoping (optional)
    #[serde(default)]
    pub logs: Option<ServerLogsConfig>,
    /// Deprecated: per-server metrics. Accepted but ignored in favor of the
    /// app-level `metrics` block; provision logs a warning
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
}

/// Access-log scoping for a server
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ServerLogsConfig {
    /// Logger name used when no host-specific name matches
    #[serde(default)]
    pub default_logger_name: Option<String>,
    /// Host to logger-name mapping; keys must not contain a port
    #[serde(default)]
    pub logger_names: BTreeMap<String, String>,
    /// Hosts whose requests are not access-logged
    #[serde(default)]
    pub skip_hosts: Vec<String>,
}

/// A configured listener wrapper
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "wrapper", rename_all = "snake_case")]
pub enum ListenerWrapperConfig {
    /// Placeholder marking where TLS termination runs in the chain
    Tls,
}

fn default_client_ip_headers() -> Vec<String> {
    vec!["X-Forwarded-For".to_string()]
}
