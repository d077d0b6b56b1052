use serde::Deserialize;

/// Transport timeouts for one server
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct TimeoutConfig {
    /// Whole-request read timeout in milliseconds
    /// Default: 0 (disabled)
    #[serde(default)]
    pub read_ms: u64,
    /// Header read timeout in milliseconds
    /// Default: 60000 (1 minute)
    #[serde(default = "default_read_header_timeout")]
    pub read_header_ms: u64,
    /// Response write timeout in milliseconds
    /// Default: 0 (disabled)
    #[serde(default)]
    pub write_ms: u64,
    /// Idle keep-alive connection timeout in milliseconds
    /// Default: 300000 (5 minutes)
    #[serde(default = "default_idle_timeout")]
    pub idle_ms: u64,
    /// HTTP/2 keep-alive ping interval in milliseconds
    /// Default: 0 (pings disabled)
    #[serde(default)]
    pub keep_alive_interval_ms: u64,
    /// Upper bound on request header bytes
    /// Default: 1 MiB
    #[serde(default = "default_max_header_bytes")]
    pub max_header_bytes: usize,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read_ms: 0,
            read_header_ms: default_read_header_timeout(),
            write_ms: 0,
            idle_ms: default_idle_timeout(),
            keep_alive_interval_ms: 0,
            max_header_bytes: default_max_header_bytes(),
        }
    }
}

fn default_read_header_timeout() -> u64 {
    60_000
}

fn default_idle_timeout() -> u64 {
    300_000
}

fn default_max_header_bytes() -> usize {
    1024 * 1024
}
