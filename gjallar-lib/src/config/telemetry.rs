use serde::Deserialize;

/// Observability sidecar configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct TelemetryConfig {
    /// Metrics server port (optional)
    /// If provided, a separate HTTP server on this port serves Prometheus
    /// metrics and health checks
    /// Default: None (sidecar disabled)
    #[serde(default)]
    pub metrics_port: Option<u16>,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application-level structured logging (stdout/stderr)
#[derive(Debug, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    /// Default: "info"
    /// Can be overridden at runtime via RUST_LOG environment variable
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Show module path (target) in log messages
    /// Default: false
    #[serde(default)]
    pub show_target: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}
