use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::autohttps::{route_hosts, AutoHttps};
use crate::config::AppConfig;
use crate::error::{AppError, Result};
use crate::metrics::{init_metrics, is_concrete_host, MetricsObserver};
use crate::registry::ListenerRegistry;
use crate::server::{Server, StartContext};
use crate::shutdown::WaitGroup;
use crate::tls::CertManager;

/// The HTTP application: owns the named servers and drives their lifecycle
/// through Provision, Validate, Start and Stop.
pub struct App {
    cfg: AppConfig,
    registry: Arc<ListenerRegistry>,
    cert_manager: Arc<dyn CertManager>,
    auto_https: AutoHttps,
    servers: BTreeMap<String, Arc<Server>>,
    observer: Option<Arc<MetricsObserver>>,
    prom_registry: Option<prometheus::Registry>,
    telemetry_cancel: CancellationToken,
    started: Arc<AtomicBool>,
}

impl App {
    /// The registry and certificate manager are explicit collaborators so a
    /// reload can share the registry between old and new configurations and
    /// tests can supply fakes.
    pub fn new(
        cfg: AppConfig,
        registry: Arc<ListenerRegistry>,
        cert_manager: Arc<dyn CertManager>,
    ) -> Self {
        Self {
            cfg,
            registry,
            cert_manager,
            auto_https: AutoHttps::new(),
            servers: BTreeMap::new(),
            observer: None,
            prom_registry: None,
            telemetry_cancel: CancellationToken::new(),
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn servers(&self) -> &BTreeMap<String, Arc<Server>> {
        &self.servers
    }

    pub fn server(&self, name: &str) -> Option<&Arc<Server>> {
        self.servers.get(name)
    }

    /// Certificate domain inventory accumulated by AutoHTTPS phase 1;
    /// consumed (and cleared) by phase 2 during start
    pub fn cert_domains(&self) -> &BTreeSet<String> {
        self.auto_https.domains()
    }

    pub fn metrics_observer(&self) -> Option<&Arc<MetricsObserver>> {
        self.observer.as_ref()
    }

    pub fn prometheus_registry(&self) -> Option<&prometheus::Registry> {
        self.prom_registry.as_ref()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    /// Resolve collaborators, run AutoHTTPS phase 1 and provision every
    /// server. Fails with InvalidConfiguration on any semantic violation.
    pub fn provision(&mut self) -> Result<()> {
        // both the stream TLS stack and quinn link a crypto provider; pin
        // one process-wide so config builders are unambiguous
        let _ = tokio_rustls::rustls::crypto::ring::default_provider().install_default();

        self.auto_https.phase1(&mut self.cfg)?;

        if let Some(metrics_cfg) = self.cfg.metrics {
            let (metrics, registry) = init_metrics()
                .map_err(|e| AppError::Config(format!("failed to initialize metrics: {e}")))?;
            let allowed_hosts: HashSet<String> = self
                .cfg
                .servers
                .values()
                .flat_map(|s| route_hosts(&s.routes))
                .filter(|h| is_concrete_host(h))
                .map(str::to_ascii_lowercase)
                .collect();
            let has_https_server = self
                .cfg
                .servers
                .values()
                .any(|s| !s.tls_connection_policies.is_empty());
            self.observer = Some(Arc::new(MetricsObserver::new(
                metrics_cfg,
                metrics,
                allowed_hosts,
                has_https_server,
            )));
            self.prom_registry = Some(registry);
        }

        self.servers.clear();
        for (name, server_cfg) in &self.cfg.servers {
            if server_cfg.metrics.is_some() {
                warn!(
                    server = %name,
                    "per-server metrics is deprecated; configure the app-level metrics block"
                );
            }
            let server = Server::provision(name, server_cfg, self.observer.as_ref())?;
            self.servers.insert(name.clone(), Arc::new(server));
        }
        Ok(())
    }

    /// Expand every listen address and reject configurations where two
    /// servers claim the same concrete address.
    pub fn validate(&self) -> Result<()> {
        let mut claimed: HashMap<String, String> = HashMap::new();
        for (name, server) in &self.servers {
            for addr in server.listen() {
                for offset in 0..addr.port_range_size() {
                    let key = addr.registry_key_at(offset);
                    if let Some(first) = claimed.get(&key) {
                        return Err(AppError::DuplicateListener {
                            addr: addr.at(offset).to_string(),
                            first: first.clone(),
                        });
                    }
                    claimed.insert(key, name.clone());
                }
            }
        }
        Ok(())
    }

    /// Bring up every server's listeners in configuration order, then run
    /// AutoHTTPS phase 2. The first failure unwinds already-started servers
    /// through the normal shutdown path and is returned.
    pub async fn start(&mut self) -> Result<()> {
        let ctx = StartContext {
            http_port: self.cfg.http_port,
            registry: self.registry.clone(),
            cert_manager: self.cert_manager.clone(),
        };

        for (name, server) in &self.servers {
            if let Err(e) = server.start(&ctx).await {
                error!(server = %name, error = %e, "server start failed; unwinding");
                self.stop_inner(true, false).await;
                return Err(e);
            }
        }

        if let Err(e) = self.auto_https.phase2(self.cert_manager.as_ref()) {
            error!(error = %e, "certificate provisioning failed; unwinding");
            self.stop_inner(true, false).await;
            return Err(e);
        }

        if let (Some(port), Some(registry)) =
            (self.cfg.telemetry.metrics_port, self.prom_registry.clone())
        {
            let started = self.started.clone();
            let cancel = self.telemetry_cancel.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    crate::telemetry::start_observability_server(port, registry, started, cancel)
                        .await
                {
                    error!(error = %e, "observability server failed");
                }
            });
        }

        self.started.store(true, Ordering::SeqCst);
        info!(servers = self.servers.len(), "http application started");
        Ok(())
    }

    /// Two-phase graceful shutdown. Always succeeds; individual transport
    /// errors are logged with address context.
    pub async fn stop(&self, exiting: bool) {
        self.stop_inner(exiting, true).await;
    }

    async fn stop_inner(&self, exiting: bool, with_delay: bool) {
        self.started.store(false, Ordering::SeqCst);

        // phase one: the advertise-shutdown delay. Listeners whose address
        // is claimed by another configuration (registry count >= 2) are
        // being handed off in a reload and keep serving without delay.
        let delay_ms = self.cfg.shutdown_delay_ms;
        let mut delay = false;
        if with_delay && delay_ms > 0 {
            let scheduled = Instant::now() + Duration::from_millis(delay_ms);
            for server in self.servers.values() {
                let closing = server
                    .bound_keys()
                    .iter()
                    .any(|key| self.registry.usage(key) < 2);
                if closing {
                    server.set_shutdown_at(scheduled);
                    delay = true;
                }
            }
        }
        if delay {
            info!(delay_ms, "shutdown delay in effect; servers continue serving");
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }

        // grace context: zero means eternal
        let grace = CancellationToken::new();
        if self.cfg.grace_period_ms > 0 {
            let grace = grace.clone();
            let period = Duration::from_millis(self.cfg.grace_period_ms);
            tokio::spawn(async move {
                tokio::time::sleep(period).await;
                grace.cancel();
            });
        }

        // parallel per-transport drain. The started barrier guarantees no
        // listener accepts new connections once `stop` returns; the
        // finished barrier is only awaited when the process exits, so a
        // reload is not stalled by residual drain.
        let started_wg = WaitGroup::new();
        let finished_wg = WaitGroup::new();
        for (name, server) in &self.servers {
            started_wg.add(3);
            finished_wg.add(3);

            {
                let server = server.clone();
                let grace = grace.clone();
                let started = started_wg.clone();
                let finished = finished_wg.clone();
                tokio::spawn(async move {
                    server.begin_stream_shutdown();
                    started.done();
                    server.shutdown_stream(&grace).await;
                    finished.done();
                });
            }
            {
                let server = server.clone();
                let grace = grace.clone();
                let started = started_wg.clone();
                let finished = finished_wg.clone();
                tokio::spawn(async move {
                    server.begin_h3_shutdown();
                    started.done();
                    server.shutdown_h3(&grace).await;
                    finished.done();
                });
            }
            {
                let server = server.clone();
                let grace = grace.clone();
                let started = started_wg.clone();
                let finished = finished_wg.clone();
                tokio::spawn(async move {
                    started.done();
                    server.shutdown_h2c(&grace).await;
                    finished.done();
                });
            }
            info!(server = %name, "server shutdown scheduled");
        }

        started_wg.wait().await;
        if exiting {
            finished_wg.wait().await;
        }

        for server in self.servers.values() {
            server.run_stop_hooks(&grace).await;
        }

        self.telemetry_cancel.cancel();
        info!(exiting, "http application stopped");
    }
}
