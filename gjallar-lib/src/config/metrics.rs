use serde::Deserialize;

/// Request metrics configuration
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsConfig {
    /// Add a host label to every request metric. Hosts not present in any
    /// route host matcher collapse to "_other" unless admitted by the
    /// catch-all policy, so arbitrary Host headers cannot explode metric
    /// cardinality.
    #[serde(default)]
    pub per_host: bool,
    /// Admit any request host as a label value even on plaintext servers
    #[serde(default)]
    pub allow_catch_all_hosts: bool,
}
