use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use thiserror::Error;

/// Request body as seen by handlers. Stream (hyper) and datagram (h3)
/// transports box their native bodies into this.
pub type ReqBody = BoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Response body produced by handlers
pub type RespBody = BoxBody<Bytes, Infallible>;

pub type HandlerResult = std::result::Result<Response<RespBody>, HandlerError>;

pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResult> + Send>>;

/// A request handler. Middleware and terminal handlers share this surface;
/// the metrics observer wraps it transparently.
pub trait Handler: Send + Sync {
    /// Stable name used as the `handler` metric label
    fn name(&self) -> &'static str;

    fn call(&self, req: Request<ReqBody>, ctx: RequestContext) -> HandlerFuture;
}

/// Per-request state threaded explicitly through the handler chain
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Name of the server that accepted the request
    pub server: Arc<str>,
    /// Transport peer address; None on unix sockets
    pub peer: Option<SocketAddr>,
    /// Resolved client address, honoring trusted proxies
    pub client_ip: Option<IpAddr>,
    /// SNI presented during the TLS handshake
    pub sni: Option<String>,
    pub is_tls: bool,
    /// Lifecycle state at request entry, for health-check integration
    pub shutting_down: bool,
    pub time_until_shutdown: Option<Duration>,
}

impl RequestContext {
    /// Lifecycle placeholders published by the core. All other placeholder
    /// families come from the request-processing collaborators.
    pub fn placeholder(&self, key: &str) -> Option<String> {
        match key {
            "http.shutting_down" => Some(self.shutting_down.to_string()),
            "http.time_until_shutdown" => Some(
                self.time_until_shutdown
                    .map(|d| format!("{}ms", d.as_millis()))
                    .unwrap_or_else(|| "0ms".to_string()),
            ),
            _ => None,
        }
    }
}

/// An error produced by the handler chain, optionally carrying the HTTP
/// status to respond with
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct HandlerError {
    pub status: Option<StatusCode>,
    pub message: String,
}

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { status: None, message: message.into() }
    }

    pub fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status: Some(status), message: message.into() }
    }

    pub fn status_or_500(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

pub fn empty_body() -> RespBody {
    Full::new(Bytes::new()).boxed()
}

/// Empty request body, used for synthesized requests such as error-chain
/// re-dispatch
pub fn empty_req_body() -> ReqBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

pub fn full_body(data: impl Into<Bytes>) -> RespBody {
    Full::new(data.into()).boxed()
}

/// Minimal status-only response used when no error route handles a failure
pub fn synthetic_error_response(status_code: StatusCode) -> Response<RespBody> {
    let mut resp = Response::new(empty_body());
    *resp.status_mut() = status_code;
    resp
}
