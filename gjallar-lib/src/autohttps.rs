use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::addr::ListenAddr;
use crate::config::{
    AppConfig, ConnectionPolicy, HandlerConfig, MatcherSetConfig, RouteConfig, ServerConfig,
};
use crate::error::Result;
use crate::metrics::is_concrete_host;
use crate::tls::CertManager;

/// Two-phase automatic HTTPS driver.
///
/// Phase 1 runs during provision, before per-server setup: it scans route
/// host matchers, synthesizes default TLS policies for HTTPS-only servers,
/// synthesizes HTTP-to-HTTPS redirect routes for mixed servers, and
/// accumulates the certificate domain inventory. Phase 2 runs during start,
/// after listeners bind, and hands the inventory to the certificate
/// manager. The inventory is written in phase 1, read and cleared in phase
/// 2, never concurrently.
#[derive(Debug, Default)]
pub struct AutoHttps {
    all_cert_domains: BTreeSet<String>,
}

impl AutoHttps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domains(&self) -> &BTreeSet<String> {
        &self.all_cert_domains
    }

    pub fn phase1(&mut self, cfg: &mut AppConfig) -> Result<()> {
        let http_port = cfg.http_port;
        let https_port = cfg.https_port;
        for (name, server) in cfg.servers.iter_mut() {
            let domains = qualifying_domains(&server.routes);

            let ports = stream_ports(server)?;
            let https_only = !ports.is_empty() && ports.iter().all(|p| *p == https_port);

            if https_only && server.tls_connection_policies.is_empty() {
                debug!(server = %name, "automatic HTTPS: synthesizing default TLS connection policy");
                server.tls_connection_policies.push(ConnectionPolicy::default());
            }

            let serves_tls = !server.tls_connection_policies.is_empty();
            let mixes = serves_tls && ports.contains(&http_port);
            let already_redirects = server.routes.first().is_some_and(|r| {
                r.handle
                    .iter()
                    .any(|h| matches!(h, HandlerConfig::HttpsRedirect { .. }))
            });
            if mixes && !domains.is_empty() && !already_redirects {
                info!(
                    server = %name,
                    domains = domains.len(),
                    "automatic HTTPS: synthesizing HTTP->HTTPS redirect route"
                );
                server.routes.insert(
                    0,
                    RouteConfig {
                        matchers: vec![MatcherSetConfig {
                            host: domains.iter().cloned().collect(),
                            path: Vec::new(),
                            protocol: Some("http".to_string()),
                        }],
                        handle: vec![HandlerConfig::HttpsRedirect { to_port: https_port }],
                        terminal: true,
                    },
                );
            }

            if serves_tls {
                self.all_cert_domains.extend(domains);
            }
        }
        Ok(())
    }

    /// Hand the accumulated domain inventory to the certificate manager.
    /// Failure is fatal to `start`; the inventory is cleared afterwards
    /// either way.
    pub fn phase2(&mut self, cert_manager: &dyn CertManager) -> Result<()> {
        let domains: Vec<String> = std::mem::take(&mut self.all_cert_domains).into_iter().collect();
        if domains.is_empty() {
            return Ok(());
        }
        info!(domains = domains.len(), "automatic HTTPS: provisioning certificates");
        cert_manager.provision(&domains)
    }
}

/// Every host-matcher value across a route list
pub fn route_hosts(routes: &[RouteConfig]) -> impl Iterator<Item = &str> {
    routes
        .iter()
        .flat_map(|r| r.matchers.iter())
        .flat_map(|m| m.host.iter())
        .map(String::as_str)
}

/// Host names eligible for certificate management: concrete (no wildcard,
/// no placeholder) and not an IP address
pub fn qualifying_domains(routes: &[RouteConfig]) -> BTreeSet<String> {
    route_hosts(routes)
        .filter(|h| is_concrete_host(h))
        .filter(|h| h.parse::<std::net::IpAddr>().is_err())
        .map(str::to_ascii_lowercase)
        .collect()
}

/// All concrete stream ports a server listens on
fn stream_ports(server: &ServerConfig) -> Result<BTreeSet<u16>> {
    let mut ports = BTreeSet::new();
    for raw in &server.listen {
        let addr = ListenAddr::parse(raw)?;
        if addr.network.is_unix() || addr.network.is_fd() {
            continue;
        }
        for offset in 0..addr.port_range_size() {
            ports.insert(addr.port(offset));
        }
    }
    Ok(ports)
}
