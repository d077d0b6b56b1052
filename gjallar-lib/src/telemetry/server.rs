use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use http::StatusCode;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use prometheus::Registry;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::handler::{full_body, RespBody};
use crate::telemetry::{
    handle_metrics, health_check_response, live_check_response, ready_check_response,
};

/// Serve metrics and health checks on a dedicated port:
/// - `/metrics` - Prometheus metrics
/// - `/health` - process health
/// - `/ready` - listener readiness
/// - `/live` - liveness
pub async fn start_observability_server(
    port: u16,
    registry: Registry,
    started: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Arc::new(registry);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(?addr, "observability server started (metrics + health checks)");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => {
                let (stream, peer) = match result {
                    Ok((stream, peer)) => (stream, peer),
                    Err(e) => {
                        warn!(error = %e, "observability server: accept error");
                        continue;
                    }
                };

                let registry = registry.clone();
                let started = started.clone();
                tokio::spawn(async move {
                    let svc = hyper::service::service_fn(move |req: Request<Incoming>| {
                        let registry = registry.clone();
                        let started = started.clone();
                        async move {
                            let resp: hyper::Response<RespBody> = match req.uri().path() {
                                "/health" => health_check_response(),
                                "/ready" => ready_check_response(started.load(Ordering::SeqCst)),
                                "/live" => live_check_response(),
                                "/metrics" => match handle_metrics(&registry) {
                                    Ok(resp) => resp,
                                    Err(_) => {
                                        let mut resp = hyper::Response::new(full_body(
                                            "Internal Server Error",
                                        ));
                                        *resp.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                                        resp
                                    }
                                },
                                _ => {
                                    let mut resp = hyper::Response::new(full_body("Not Found"));
                                    *resp.status_mut() = StatusCode::NOT_FOUND;
                                    resp
                                }
                            };
                            Ok::<_, Infallible>(resp)
                        }
                    });

                    let builder = ConnBuilder::new(TokioExecutor::new());
                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), svc).await {
                        warn!(?peer, error = %e, "observability server: serve_connection error");
                    }
                });
            }
        }
    }

    info!("observability server stopped");
    Ok(())
}
