use std::collections::HashMap;
use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use http::StatusCode;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Request, Response};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use ipnet::IpNet;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::addr::ListenAddr;
use crate::config::{Protocol, ServerConfig, ServerLogsConfig, TimeoutConfig};
use crate::error::{AppError, Result};
use crate::handler::{
    synthetic_error_response, Handler, ReqBody, RequestContext, RespBody,
};
use crate::listener::h2::{H2TrackingListener, H2cGate};
use crate::listener::{
    bind_stream, Accepted, BoxListener, IoTimeoutStream, TlsHandshakeInfo, TlsTerminator,
    WrapperPipeline,
};
use crate::metrics::MetricsObserver;
use crate::registry::ListenerRegistry;
use crate::routes::{compile_routes, host_matches, normalize_host, request_host};
use crate::tls::{alpn_for_protocols, CertManager, ConnectionPolicies};

/// Per-start collaborators shared by every server
pub(crate) struct StartContext {
    pub http_port: u16,
    pub registry: Arc<ListenerRegistry>,
    pub cert_manager: Arc<dyn CertManager>,
}

/// An async stop hook, invoked with the grace token when the server stops
pub type StopHook = Box<
    dyn Fn(
            CancellationToken,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = std::result::Result<(), String>> + Send>,
        > + Send
        + Sync,
>;

/// One named listener-server: the compiled handler chain, the listener set
/// and all runtime shutdown state.
pub struct Server {
    name: Arc<str>,
    listen: Vec<ListenAddr>,
    listen_protocols: Vec<Vec<Protocol>>,
    wrappers: WrapperPipeline,
    tls_policies: ConnectionPolicies,
    strict_sni_host: bool,
    handler: Arc<dyn Handler>,
    error_handler: Option<Arc<dyn Handler>>,
    named_routes: HashMap<String, Arc<dyn Handler>>,
    timeouts: TimeoutConfig,
    trusted_proxies: Vec<IpNet>,
    client_ip_headers: Vec<String>,
    logs: Option<ServerLogsConfig>,

    shutdown_at: RwLock<Option<Instant>>,
    h2c_gate: H2cGate,
    h2_force_close: CancellationToken,
    accept_cancel: CancellationToken,
    drain: CancellationToken,
    h3_cancel: CancellationToken,
    active_conns: Arc<AtomicUsize>,
    conns_closed: watch::Sender<()>,
    h3_endpoints: Mutex<Vec<quinn::Endpoint>>,
    bound_keys: Mutex<Vec<String>>,
    stop_hooks: Mutex<Vec<StopHook>>,
}

impl Server {
    /// Build a server from configuration: protocol normalization and
    /// validation, wrapper-pipeline materialization, TLS policy
    /// provisioning, route compilation and default timeouts.
    pub fn provision(
        name: &str,
        cfg: &ServerConfig,
        observer: Option<&Arc<MetricsObserver>>,
    ) -> Result<Server> {
        let protocols = normalize_protocols(cfg.protocols.as_ref());
        validate_protocols(&protocols)?;

        let mut listen = Vec::with_capacity(cfg.listen.len());
        for raw in &cfg.listen {
            listen.push(ListenAddr::parse(raw)?);
        }

        let listen_protocols = match &cfg.listen_protocols {
            Some(overrides) => {
                if overrides.len() != cfg.listen.len() {
                    return Err(AppError::InvalidConfiguration(format!(
                        "server '{name}': listen_protocols must have exactly one entry per listen address ({} != {})",
                        overrides.len(),
                        cfg.listen.len()
                    )));
                }
                let mut resolved = Vec::with_capacity(overrides.len());
                for entry in overrides {
                    match entry {
                        Some(protos) => {
                            let protos = normalize_protocols(Some(protos));
                            validate_protocols(&protos)?;
                            resolved.push(protos);
                        }
                        None => resolved.push(protocols.clone()),
                    }
                }
                resolved
            }
            None => vec![protocols.clone(); listen.len()],
        };

        let wrappers = WrapperPipeline::from_config(&cfg.listener_wrappers)?;
        let tls_policies = ConnectionPolicies::provision(&cfg.tls_connection_policies)?;

        // client-certificate policies default to strict SNI enforcement,
        // otherwise domain fronting could bypass them
        let strict_sni_host = cfg
            .strict_sni_host
            .unwrap_or_else(|| tls_policies.requires_client_auth());

        if let Some(logs) = &cfg.logs {
            for key in logs.logger_names.keys() {
                if key.contains(':') {
                    return Err(AppError::InvalidConfiguration(format!(
                        "server '{name}': logger name keys must not contain a port: '{key}'"
                    )));
                }
            }
        }

        let mut trusted_proxies = Vec::with_capacity(cfg.trusted_proxies.len());
        for cidr in &cfg.trusted_proxies {
            let net = cidr.parse::<IpNet>().map_err(|_| {
                AppError::InvalidConfiguration(format!(
                    "server '{name}': invalid trusted proxy range '{cidr}'"
                ))
            })?;
            trusted_proxies.push(net);
        }

        let decorate: Box<dyn Fn(Arc<dyn Handler>) -> Arc<dyn Handler>> = match observer {
            Some(obs) => {
                let obs = obs.clone();
                let server = name.to_string();
                Box::new(move |h| obs.wrap(&server, h))
            }
            None => Box::new(|h| h),
        };

        let handler: Arc<dyn Handler> = compile_routes(&cfg.routes, &*decorate)?;
        let error_handler: Option<Arc<dyn Handler>> = if cfg.errors.is_empty() {
            None
        } else {
            let chain: Arc<dyn Handler> = compile_routes(&cfg.errors, &*decorate)?;
            Some(chain)
        };
        let mut named_routes: HashMap<String, Arc<dyn Handler>> =
            HashMap::with_capacity(cfg.named_routes.len());
        for (route_name, route) in &cfg.named_routes {
            let chain: Arc<dyn Handler> = compile_routes(std::slice::from_ref(route), &*decorate)?;
            named_routes.insert(route_name.clone(), chain);
        }

        let (conns_closed, _) = watch::channel(());

        Ok(Server {
            name: Arc::from(name),
            listen,
            listen_protocols,
            wrappers,
            tls_policies,
            strict_sni_host,
            handler,
            error_handler,
            named_routes,
            timeouts: cfg.timeouts.clone(),
            trusted_proxies,
            client_ip_headers: cfg.client_ip_headers.clone(),
            logs: cfg.logs.clone(),
            shutdown_at: RwLock::new(None),
            h2c_gate: H2cGate::new(),
            h2_force_close: CancellationToken::new(),
            accept_cancel: CancellationToken::new(),
            drain: CancellationToken::new(),
            h3_cancel: CancellationToken::new(),
            active_conns: Arc::new(AtomicUsize::new(0)),
            conns_closed,
            h3_endpoints: Mutex::new(Vec::new()),
            bound_keys: Mutex::new(Vec::new()),
            stop_hooks: Mutex::new(Vec::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn listen(&self) -> &[ListenAddr] {
        &self.listen
    }

    pub fn listen_protocols(&self) -> &[Vec<Protocol>] {
        &self.listen_protocols
    }

    pub fn strict_sni_host(&self) -> bool {
        self.strict_sni_host
    }

    pub fn wrapper_stages(&self) -> Vec<&'static str> {
        self.wrappers.stage_names()
    }

    pub fn named_route(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.named_routes.get(name).cloned()
    }

    pub fn h2c_gate(&self) -> &H2cGate {
        &self.h2c_gate
    }

    pub(crate) fn h3_cancel_token(&self) -> &CancellationToken {
        &self.h3_cancel
    }

    /// QUIC server config for this server's H3 endpoints: the consolidated
    /// TLS config restricted to the "h3" ALPN identifier
    pub(crate) fn build_h3_config(
        &self,
        cert_manager: Arc<dyn CertManager>,
    ) -> Result<quinn::ServerConfig> {
        let tls = self
            .tls_policies
            .build_server_config(vec![b"h3".to_vec()], cert_manager)?;
        let quic = quinn::crypto::rustls::QuicServerConfig::try_from(tls)
            .map_err(|e| AppError::TlsProvision(format!("h3 TLS config rejected: {e}")))?;
        Ok(quinn::ServerConfig::with_crypto(Arc::new(quic)))
    }

    pub fn register_stop_hook(&self, hook: StopHook) {
        self.stop_hooks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(hook);
    }

    /// Registry keys of every listener this server has bound
    pub fn bound_keys(&self) -> Vec<String> {
        self.bound_keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn set_shutdown_at(&self, at: Instant) {
        let mut guard = self.shutdown_at.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(at);
    }

    pub fn shutting_down(&self) -> bool {
        self.shutdown_at
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    pub fn time_until_shutdown(&self) -> Option<Duration> {
        self.shutdown_at
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    /// Bring up every listener of this server. Stream listeners bind before
    /// the H3 endpoint of the same address; any bind failure fails start.
    pub(crate) async fn start(self: &Arc<Self>, ctx: &StartContext) -> Result<()> {
        for (i, addr) in self.listen.iter().enumerate() {
            let protos = self.listen_protocols[i].clone();
            for offset in 0..addr.port_range_size() {
                self.start_listener(ctx, addr, offset, &protos).await?;
            }
        }
        Ok(())
    }

    async fn start_listener(
        self: &Arc<Self>,
        ctx: &StartContext,
        addr: &ListenAddr,
        offset: u32,
        protos: &[Protocol],
    ) -> Result<()> {
        let port = addr.port(offset);
        let use_tls = !self.tls_policies.is_empty() && port != ctx.http_port;
        let stream_protos: Vec<Protocol> = protos
            .iter()
            .copied()
            .filter(|p| matches!(p, Protocol::H1 | Protocol::H2 | Protocol::H2c))
            .collect();

        if !stream_protos.is_empty() {
            let key = addr.registry_key_at(offset);
            let mut listener = bind_stream(addr, offset).await?;
            ctx.registry.acquire(&key);
            self.bound_keys
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(key.clone());

            if addr.is_wildcard_port() {
                if let Some(local) = listener.local_addr() {
                    info!(server = %self.name, addr = %local, "listener bound to OS-assigned port");
                }
            }

            listener = self.wrappers.wrap_before_tls(listener);
            let mut offers_h2 = stream_protos.contains(&Protocol::H2);
            if use_tls {
                let alpn = alpn_for_protocols(&stream_protos);
                let tls_config = self
                    .tls_policies
                    .build_server_config(alpn, ctx.cert_manager.clone())?;
                let acceptor = TlsAcceptor::from(Arc::new(tls_config));
                listener = Box::new(TlsTerminator::new(listener, acceptor));
            } else if offers_h2 {
                warn!(
                    server = %self.name,
                    addr = %addr.at(offset),
                    "HTTP/2 requires TLS; ignoring h2 on this listener"
                );
                offers_h2 = false;
            }
            listener = self.wrappers.wrap_after_tls(listener);
            if offers_h2 {
                listener =
                    Box::new(H2TrackingListener::new(listener, self.h2_force_close.clone()));
            }

            let h2c = stream_protos.contains(&Protocol::H2c);
            // H1 accompanies H2/H2C by invariant, so a nonempty stream set
            // always gets a serve task; H2 rides the same listener via ALPN
            self.clone()
                .spawn_accept_loop(listener, key, ctx.registry.clone(), use_tls, h2c);
            info!(server = %self.name, addr = %addr.at(offset), tls = use_tls, "stream listener started");
        }

        if protos.contains(&Protocol::H3) {
            if addr.network.is_unix() {
                warn!(
                    server = %self.name,
                    addr = %addr.at(offset),
                    "HTTP/3 cannot share a socket file with a stream listener; skipping h3"
                );
            } else if !use_tls {
                warn!(
                    server = %self.name,
                    addr = %addr.at(offset),
                    "HTTP/3 requires TLS; skipping h3"
                );
            } else {
                let udp = addr.datagram_companion(offset);
                let key = udp.registry_key_at(0);
                let endpoint = crate::h3::bind_h3(self, &udp, ctx)?;
                ctx.registry.acquire(&key);
                self.bound_keys
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(key.clone());
                crate::h3::spawn_h3_server(
                    endpoint.clone(),
                    self.clone(),
                    key,
                    ctx.registry.clone(),
                );
                self.h3_endpoints
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(endpoint);
                info!(server = %self.name, addr = %udp, "h3 listener started");
            }
        }

        Ok(())
    }

    fn conn_builder(&self, h2c: bool, is_tls: bool) -> ConnBuilder<TokioExecutor> {
        let mut builder = ConnBuilder::new(TokioExecutor::new());
        if !h2c && !is_tls {
            // plaintext without h2c only ever speaks HTTP/1
            builder = builder.http1_only();
        }
        {
            let mut http1 = builder.http1();
            http1.timer(TokioTimer::new());
            http1.keep_alive(true);
            if self.timeouts.read_header_ms > 0 {
                http1.header_read_timeout(Duration::from_millis(self.timeouts.read_header_ms));
            }
            if self.timeouts.max_header_bytes > 0 {
                http1.max_buf_size(self.timeouts.max_header_bytes.max(8192));
            }
        }
        {
            let mut http2 = builder.http2();
            http2.timer(TokioTimer::new());
            if self.timeouts.keep_alive_interval_ms > 0 {
                http2.keep_alive_interval(Some(Duration::from_millis(
                    self.timeouts.keep_alive_interval_ms,
                )));
            }
            if self.timeouts.max_header_bytes > 0 {
                http2.max_header_list_size(self.timeouts.max_header_bytes as u32);
            }
        }
        builder
    }

    fn spawn_accept_loop(
        self: Arc<Self>,
        mut listener: BoxListener,
        key: String,
        registry: Arc<ListenerRegistry>,
        is_tls: bool,
        h2c: bool,
    ) {
        tokio::spawn(async move {
            let builder = self.conn_builder(h2c, is_tls);
            loop {
                tokio::select! {
                    _ = self.accept_cancel.cancelled() => break,
                    result = listener.accept() => {
                        match result {
                            Ok(accepted) => {
                                self.clone().spawn_connection(accepted, builder.clone());
                            }
                            Err(e) => {
                                warn!(server = %self.name, error = %e, "accept error");
                                continue;
                            }
                        }
                    }
                }
            }
            registry.release(&key);
            debug!(server = %self.name, listener = %key, "accept loop stopped");
        });
    }

    fn spawn_connection(self: Arc<Self>, accepted: Accepted, builder: ConnBuilder<TokioExecutor>) {
        self.active_conns.fetch_add(1, Ordering::Relaxed);
        let guard = ConnGuard {
            counter: self.active_conns.clone(),
            notifier: self.conns_closed.clone(),
        };

        let Accepted { stream, peer, tls } = accepted;
        let read_deadline = match (self.timeouts.read_ms, self.timeouts.idle_ms) {
            (0, 0) => None,
            (0, idle) => Some(Duration::from_millis(idle)),
            (read, _) => Some(Duration::from_millis(read)),
        };
        let write_deadline = match self.timeouts.write_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        };
        let stream = IoTimeoutStream::new(stream, read_deadline, write_deadline);

        tokio::spawn(async move {
            let _guard = guard;
            let server = self.clone();
            let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                let server = server.clone();
                let tls = tls.clone();
                async move {
                    let tls_info = tls.as_ref().and_then(|cell| cell.get().cloned());
                    let req = req.map(|body| {
                        body.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                            .boxed()
                    });
                    let resp = server.process_request(req, peer, tls_info).await;
                    Ok::<_, Infallible>(resp)
                }
            });

            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), svc);
            let mut conn = pin!(conn);
            tokio::select! {
                result = conn.as_mut() => {
                    if let Err(e) = result {
                        debug!(server = %self.name, ?peer, error = %e, "serve_connection error");
                    }
                }
                _ = self.drain.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    if let Err(e) = conn.as_mut().await {
                        debug!(server = %self.name, ?peer, error = %e, "serve_connection error during drain");
                    }
                }
            }
        });
    }

    /// The canonical request path, shared by the stream and H3 transports:
    /// H2C upgrade tracking, strict-SNI enforcement, client-IP resolution,
    /// the handler chain, the error chain and access logging.
    pub(crate) async fn process_request(
        self: &Arc<Self>,
        req: Request<ReqBody>,
        peer: Option<SocketAddr>,
        tls: Option<TlsHandshakeInfo>,
    ) -> Response<RespBody> {
        let _h2c_guard = self.h2c_gate.track(&req);

        let start = Instant::now();
        let method = req.method().clone();
        let uri = req.uri().clone();
        let host = request_host(&req);

        let ctx = RequestContext {
            server: self.name.clone(),
            peer,
            client_ip: self.resolve_client_ip(&req, peer),
            sni: tls.as_ref().and_then(|t| t.sni.clone()),
            is_tls: tls.is_some(),
            shutting_down: self.shutting_down(),
            time_until_shutdown: self.time_until_shutdown(),
        };

        // compare SNI to Host so an unprotected SNI cannot front for a
        // host whose policy demands client certificates
        if self.strict_sni_host && ctx.is_tls {
            let sni = ctx.sni.as_deref().map(normalize_host);
            let host_hdr = host.clone();
            let mismatch = match (&sni, &host_hdr) {
                (Some(sni), Some(host)) => !host_matches(sni, host),
                (None, Some(_)) | (Some(_), None) => true,
                (None, None) => false,
            };
            if mismatch {
                debug!(
                    server = %self.name,
                    sni = ctx.sni.as_deref().unwrap_or(""),
                    host = host_hdr.as_deref().unwrap_or(""),
                    "strict SNI-host mismatch"
                );
                let resp = synthetic_error_response(StatusCode::MISDIRECTED_REQUEST);
                self.access_log(&method, &uri, host.as_deref(), resp.status(), start);
                return resp;
            }
        }

        let resp = match self.handler.call(req, ctx.clone()).await {
            Ok(resp) => resp,
            Err(err) => {
                let status = err.status_or_500();
                if status.is_server_error() {
                    error!(server = %self.name, %uri, status = status.as_u16(), error = %err, "request failed");
                } else {
                    debug!(server = %self.name, %uri, status = status.as_u16(), error = %err, "request failed");
                }
                match &self.error_handler {
                    Some(chain) => {
                        let mut error_req = Request::builder()
                            .method(method.clone())
                            .uri(uri.clone());
                        if let Some(h) = &host {
                            error_req = error_req.header(http::header::HOST, h.as_str());
                        }
                        match error_req.body(crate::handler::empty_req_body()) {
                            Ok(error_req) => match chain.call(error_req, ctx).await {
                                Ok(resp) => resp,
                                Err(chain_err) => {
                                    synthetic_error_response(chain_err.status_or_500())
                                }
                            },
                            Err(_) => synthetic_error_response(status),
                        }
                    }
                    None => synthetic_error_response(status),
                }
            }
        };

        self.access_log(&method, &uri, host.as_deref(), resp.status(), start);
        resp
    }

    fn resolve_client_ip<B>(&self, req: &Request<B>, peer: Option<SocketAddr>) -> Option<IpAddr> {
        let peer_ip = peer.map(|p| p.ip());
        let trusted = peer_ip
            .map(|ip| self.trusted_proxies.iter().any(|net| net.contains(&ip)))
            .unwrap_or(false);
        if trusted {
            for header in &self.client_ip_headers {
                let Some(value) = req.headers().get(header).and_then(|v| v.to_str().ok()) else {
                    continue;
                };
                for entry in value.split(',') {
                    let entry = normalize_host(entry);
                    if let Ok(ip) = entry.parse::<IpAddr>() {
                        return Some(ip);
                    }
                }
            }
        }
        peer_ip
    }

    fn access_log(
        &self,
        method: &http::Method,
        uri: &http::Uri,
        host: Option<&str>,
        status: StatusCode,
        start: Instant,
    ) {
        let Some(logs) = &self.logs else {
            return;
        };
        let host = host.unwrap_or("");
        if logs.skip_hosts.iter().any(|h| host_matches(h, host)) {
            return;
        }
        let logger = logs
            .logger_names
            .iter()
            .find(|(key, _)| host_matches(key, host))
            .map(|(_, name)| name.as_str())
            .or(logs.default_logger_name.as_deref())
            .unwrap_or("default");
        info!(
            target: "gjallar::access",
            logger,
            server = %self.name,
            %method,
            %uri,
            host,
            status = status.as_u16(),
            duration_ms = start.elapsed().as_millis() as u64,
            "handled request"
        );
    }

    /// Stop accepting and tell in-flight stream connections to finish up.
    /// Synchronous so the caller can reach the started-shutdown barrier the
    /// moment no new connections are admitted.
    pub(crate) fn begin_stream_shutdown(&self) {
        self.accept_cancel.cancel();
        self.drain.cancel();
    }

    /// Wait for active stream connections to drain; on grace expiry, tell
    /// the H2 tracking layer to cut its remaining sessions.
    pub(crate) async fn shutdown_stream(&self, grace: &CancellationToken) {
        let mut closed = self.conns_closed.subscribe();
        loop {
            if self.active_conns.load(Ordering::Relaxed) == 0 {
                return;
            }
            tokio::select! {
                _ = grace.cancelled() => {
                    let remaining = self.active_conns.load(Ordering::Relaxed);
                    if remaining > 0 {
                        warn!(
                            server = %self.name,
                            active = remaining,
                            "grace period expired; closing remaining connections"
                        );
                    }
                    self.h2_force_close.cancel();
                    return;
                }
                changed = closed.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    pub(crate) fn begin_h3_shutdown(&self) {
        self.h3_cancel.cancel();
    }

    /// Drain H3 connections, then close the datagram endpoints. Graceful
    /// shutdown of the datagram transport is bounded by the grace token;
    /// after it fires the endpoints are closed abruptly.
    pub(crate) async fn shutdown_h3(&self, grace: &CancellationToken) {
        let endpoints: Vec<quinn::Endpoint> = {
            let mut guard = self.h3_endpoints.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        for endpoint in endpoints {
            tokio::select! {
                _ = endpoint.wait_idle() => {}
                _ = grace.cancelled() => {
                    debug!(server = %self.name, "grace period expired; closing h3 endpoint");
                }
            }
            endpoint.close(quinn::VarInt::from_u32(0), b"server shutdown");
        }
    }

    /// Poll pending H2C upgrades until they settle or grace expires
    pub(crate) async fn shutdown_h2c(&self, grace: &CancellationToken) {
        self.h2c_gate.shutdown(grace).await;
    }

    pub(crate) async fn run_stop_hooks(&self, grace: &CancellationToken) {
        let hooks: Vec<StopHook> = {
            let mut guard = self.stop_hooks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        for hook in hooks {
            if let Err(e) = hook(grace.clone()).await {
                error!(server = %self.name, error = %e, "stop hook failed");
            }
        }
    }

    /// Number of stream connections currently being served
    pub fn active_connections(&self) -> usize {
        self.active_conns.load(Ordering::Relaxed)
    }
}

/// Decrements the active-connection counter and wakes the drain waiter when
/// the last connection closes
struct ConnGuard {
    counter: Arc<AtomicUsize>,
    notifier: watch::Sender<()>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        let remaining = self.counter.fetch_sub(1, Ordering::Relaxed);
        if remaining == 1 {
            let _ = self.notifier.send(());
        }
    }
}

/// Server-level protocol default is h1+h2+h3; the set is kept sorted and
/// deduplicated so provisioning the same config twice yields the same form
fn normalize_protocols(protocols: Option<&Vec<Protocol>>) -> Vec<Protocol> {
    let mut set = protocols
        .cloned()
        .unwrap_or_else(|| vec![Protocol::H1, Protocol::H2, Protocol::H3]);
    set.sort();
    set.dedup();
    set
}

fn validate_protocols(protocols: &[Protocol]) -> Result<()> {
    let h2 = protocols.contains(&Protocol::H2) || protocols.contains(&Protocol::H2c);
    if h2 && !protocols.contains(&Protocol::H1) {
        return Err(AppError::InvalidConfiguration(
            "cannot enable HTTP/2 or H2C without enabling HTTP/1.1".to_string(),
        ));
    }
    Ok(())
}
