use serde::Deserialize;
use std::collections::BTreeMap;

use super::metrics::MetricsConfig;
use super::server::ServerConfig;
use super::telemetry::TelemetryConfig;

/// Main application configuration
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    /// Port considered the plaintext HTTP port for protocol decisions
    /// (redirect synthesis, TLS suppression on this port)
    /// Default: 80
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Port considered the HTTPS port
    /// Default: 443
    #[serde(default = "default_https_port")]
    pub https_port: u16,
    /// Bounded time in milliseconds for in-flight connections to finish
    /// after shutdown begins
    /// Default: 0 (no bound, drain waits forever)
    #[serde(default)]
    pub grace_period_ms: u64,
    /// Delay in milliseconds before the grace period starts; servers keep
    /// accepting during the delay so load balancers can drain traffic
    /// Default: 0 (no delay)
    #[serde(default)]
    pub shutdown_delay_ms: u64,
    /// Named listener-servers. Names are opaque labels used for logging
    /// and metrics only; iteration order is the map order
    pub servers: BTreeMap<String, ServerConfig>,
    /// Request metrics configuration (optional)
    /// When present, every route handler is wrapped with the observer
    #[serde(default)]
    pub metrics: Option<MetricsConfig>,
    /// Observability sidecar configuration (metrics endpoint, health checks)
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_http_port() -> u16 {
    80
}

fn default_https_port() -> u16 {
    443
}
