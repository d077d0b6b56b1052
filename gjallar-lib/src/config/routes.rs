use serde::Deserialize;
use std::collections::BTreeMap;

/// One route: matcher sets and the handlers to run on a match
#[derive(Debug, Deserialize, Clone, Default)]
pub struct RouteConfig {
    /// Matcher sets; the route matches when any set matches (OR across
    /// sets, AND within a set). An empty list matches every request.
    #[serde(default, rename = "match")]
    pub matchers: Vec<MatcherSetConfig>,
    /// Handlers run in order until one produces a response
    #[serde(default)]
    pub handle: Vec<HandlerConfig>,
    /// Stop route evaluation after this route matches
    #[serde(default)]
    pub terminal: bool,
}

/// A conjunction of request matchers
#[derive(Debug, Deserialize, Clone, Default)]
pub struct MatcherSetConfig {
    /// Host names; `*.example.com` matches one label
    #[serde(default)]
    pub host: Vec<String>,
    /// URI paths; a trailing `*` makes the match a prefix match
    #[serde(default)]
    pub path: Vec<String>,
    /// "http" matches plaintext requests, "https" TLS-terminated ones
    #[serde(default)]
    pub protocol: Option<String>,
}

/// Built-in handlers the core itself provides. The full middleware set
/// lives outside this crate; these are the ones lifecycle management needs.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "handler", rename_all = "snake_case")]
pub enum HandlerConfig {
    /// Respond with a fixed status, headers and body
    StaticResponse {
        #[serde(default)]
        status_code: Option<u16>,
        #[serde(default)]
        body: String,
        #[serde(default)]
        headers: BTreeMap<String, String>,
    },
    /// Permanent redirect to the HTTPS port, synthesized by automatic HTTPS
    HttpsRedirect {
        #[serde(default = "default_redirect_port")]
        to_port: u16,
    },
}

fn default_redirect_port() -> u16 {
    443
}
