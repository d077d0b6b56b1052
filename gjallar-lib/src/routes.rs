use std::sync::Arc;

use http::header::{HeaderName, HeaderValue, LOCATION};
use http::StatusCode;
use hyper::body::Bytes;
use hyper::{Request, Response};

use crate::config::{HandlerConfig, MatcherSetConfig, RouteConfig};
use crate::error::{AppError, Result};
use crate::handler::{
    empty_body, full_body, Handler, HandlerError, HandlerFuture, ReqBody, RequestContext,
};

/// Wraps a compiled handler, e.g. with the metrics observer
pub type HandlerDecorator<'a> = &'a dyn Fn(Arc<dyn Handler>) -> Arc<dyn Handler>;

/// Lowercased request host with any port and IPv6 brackets stripped
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    let raw = req
        .headers()
        .get(http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())?;
    Some(normalize_host(raw))
}

pub fn normalize_host(raw: &str) -> String {
    let raw = raw.trim();
    let stripped = if let Some(end) = raw.find(']') {
        &raw[..=end]
    } else if let Some(idx) = raw.rfind(':') {
        // only strip when the suffix is a port, not an unbracketed IPv6
        if raw[idx + 1..].chars().all(|c| c.is_ascii_digit()) && raw[..idx].rfind(':').is_none() {
            &raw[..idx]
        } else {
            raw
        }
    } else {
        raw
    };
    stripped
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_ascii_lowercase()
}

/// Host pattern match; `*.example.com` matches exactly one extra label
pub fn host_matches(pattern: &str, host: &str) -> bool {
    if let Some(suffix) = pattern.strip_prefix("*.") {
        match host.split_once('.') {
            Some((first, rest)) => !first.is_empty() && rest.eq_ignore_ascii_case(suffix),
            None => false,
        }
    } else {
        pattern.eq_ignore_ascii_case(host)
    }
}

struct MatcherSet {
    hosts: Vec<String>,
    paths: Vec<String>,
    protocol: Option<String>,
}

impl MatcherSet {
    fn from_config(cfg: &MatcherSetConfig) -> Self {
        Self {
            hosts: cfg.host.iter().map(|h| h.to_ascii_lowercase()).collect(),
            paths: cfg.path.clone(),
            protocol: cfg.protocol.clone(),
        }
    }

    fn matches(&self, req: &Request<ReqBody>, ctx: &RequestContext) -> bool {
        if let Some(proto) = &self.protocol {
            let want_tls = proto == "https";
            if ctx.is_tls != want_tls {
                return false;
            }
        }
        if !self.hosts.is_empty() {
            let Some(host) = request_host(req) else {
                return false;
            };
            if !self.hosts.iter().any(|p| host_matches(p, &host)) {
                return false;
            }
        }
        if !self.paths.is_empty() {
            let path = req.uri().path();
            let hit = self.paths.iter().any(|p| match p.strip_suffix('*') {
                Some(prefix) => path.starts_with(prefix),
                None => path == p,
            });
            if !hit {
                return false;
            }
        }
        true
    }
}

struct CompiledRoute {
    sets: Vec<MatcherSet>,
    handlers: Vec<Arc<dyn Handler>>,
    terminal: bool,
}

impl CompiledRoute {
    fn matches(&self, req: &Request<ReqBody>, ctx: &RequestContext) -> bool {
        self.sets.is_empty() || self.sets.iter().any(|s| s.matches(req, ctx))
    }
}

/// The compiled handler chain for one server: routes evaluated in order,
/// first matching route with a responding handler wins.
pub struct RouteChain {
    routes: Vec<CompiledRoute>,
}

impl Handler for RouteChain {
    fn name(&self) -> &'static str {
        "routes"
    }

    fn call(&self, req: Request<ReqBody>, ctx: RequestContext) -> HandlerFuture {
        let mut selected = None;
        for route in &self.routes {
            if route.matches(&req, &ctx) {
                if let Some(h) = route.handlers.first() {
                    selected = Some(h.clone());
                    break;
                }
                if route.terminal {
                    break;
                }
            }
        }
        match selected {
            Some(handler) => handler.call(req, ctx),
            None => Box::pin(async {
                Err(HandlerError::with_status(StatusCode::NOT_FOUND, "no route matched"))
            }),
        }
    }
}

/// Fixed response handler; the terminal default of the built-in set
pub struct StaticResponse {
    status: StatusCode,
    body: Bytes,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl Handler for StaticResponse {
    fn name(&self) -> &'static str {
        "static_response"
    }

    fn call(&self, _req: Request<ReqBody>, _ctx: RequestContext) -> HandlerFuture {
        let status = self.status;
        let body = self.body.clone();
        let headers = self.headers.clone();
        Box::pin(async move {
            let mut resp = Response::new(full_body(body));
            *resp.status_mut() = status;
            for (name, value) in headers {
                resp.headers_mut().append(name, value);
            }
            Ok(resp)
        })
    }
}

/// Permanent redirect to the HTTPS port, synthesized by automatic HTTPS for
/// servers that mix plaintext and TLS listeners
pub struct HttpsRedirect {
    to_port: u16,
}

impl Handler for HttpsRedirect {
    fn name(&self) -> &'static str {
        "https_redirect"
    }

    fn call(&self, req: Request<ReqBody>, _ctx: RequestContext) -> HandlerFuture {
        let to_port = self.to_port;
        Box::pin(async move {
            let host = request_host(&req).ok_or_else(|| {
                HandlerError::with_status(StatusCode::BAD_REQUEST, "request has no host")
            })?;
            let authority = if to_port == 443 {
                host
            } else {
                format!("{host}:{to_port}")
            };
            let path_and_query = req
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str())
                .unwrap_or("/");
            let location = format!("https://{authority}{path_and_query}");
            let value = HeaderValue::from_str(&location).map_err(|_| {
                HandlerError::with_status(StatusCode::BAD_REQUEST, "unencodable redirect target")
            })?;
            let mut resp = Response::new(empty_body());
            *resp.status_mut() = StatusCode::PERMANENT_REDIRECT;
            resp.headers_mut().insert(LOCATION, value);
            Ok(resp)
        })
    }
}

fn compile_handler(cfg: &HandlerConfig) -> Result<Arc<dyn Handler>> {
    match cfg {
        HandlerConfig::StaticResponse { status_code, body, headers } => {
            let status = StatusCode::from_u16(status_code.unwrap_or(200)).map_err(|_| {
                AppError::InvalidConfiguration(format!(
                    "static_response: invalid status code {:?}",
                    status_code
                ))
            })?;
            let mut parsed = Vec::with_capacity(headers.len());
            for (name, value) in headers {
                let name = name.parse::<HeaderName>().map_err(|_| {
                    AppError::InvalidConfiguration(format!(
                        "static_response: invalid header name '{name}'"
                    ))
                })?;
                let value = HeaderValue::from_str(value).map_err(|_| {
                    AppError::InvalidConfiguration(format!(
                        "static_response: invalid header value for '{name}'"
                    ))
                })?;
                parsed.push((name, value));
            }
            Ok(Arc::new(StaticResponse {
                status,
                body: Bytes::from(body.clone()),
                headers: parsed,
            }))
        }
        HandlerConfig::HttpsRedirect { to_port } => {
            Ok(Arc::new(HttpsRedirect { to_port: *to_port }))
        }
    }
}

/// Compile a route list into a handler chain. `decorate` wraps each handler
/// (identity when metrics are disabled).
pub fn compile_routes(
    routes: &[RouteConfig],
    decorate: HandlerDecorator<'_>,
) -> Result<Arc<RouteChain>> {
    let mut compiled = Vec::with_capacity(routes.len());
    for route in routes {
        let sets = route.matchers.iter().map(MatcherSet::from_config).collect();
        let mut handlers = Vec::with_capacity(route.handle.len());
        for h in &route.handle {
            handlers.push(decorate(compile_handler(h)?));
        }
        compiled.push(CompiledRoute { sets, handlers, terminal: route.terminal });
    }
    Ok(Arc::new(RouteChain { routes: compiled }))
}
