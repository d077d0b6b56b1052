use std::collections::HashSet;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http_body_util::BodyExt;
use hyper::body::{Body, Bytes, Frame, SizeHint};
use hyper::Request;
use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram, Meter, UpDownCounter};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use tokio::time::Instant;

use crate::config::MetricsConfig;
use crate::handler::{Handler, HandlerFuture, ReqBody, RequestContext};
use crate::routes::request_host;

/// Request-level instruments. Label sets per metric:
/// in-flight/total/errors carry server+handler (+host), the histograms add
/// code and method.
#[derive(Clone)]
pub struct HttpMetrics {
    pub requests_in_flight: UpDownCounter<i64>,
    pub requests_total: Counter<u64>,
    pub request_errors_total: Counter<u64>,
    pub request_duration_seconds: Histogram<f64>,
    pub request_size_bytes: Histogram<f64>,
    pub response_size_bytes: Histogram<f64>,
    pub response_duration_seconds: Histogram<f64>,
}

/// Exponential buckets starting at 256 with factor 4, 8 buckets
fn size_buckets() -> Vec<f64> {
    (0..8).map(|i| 256.0 * 4f64.powi(i)).collect()
}

impl HttpMetrics {
    pub fn new(meter: Meter) -> Self {
        Self {
            requests_in_flight: meter
                .i64_up_down_counter("gjallar_http_requests_in_flight")
                .with_description("Number of requests currently being handled")
                .build(),
            requests_total: meter
                .u64_counter("gjallar_http_requests_total")
                .with_description("Total number of requests handled")
                .build(),
            request_errors_total: meter
                .u64_counter("gjallar_http_request_errors_total")
                .with_description("Total number of requests whose handler returned an error")
                .build(),
            request_duration_seconds: meter
                .f64_histogram("gjallar_http_request_duration_seconds")
                .with_description("Round-trip request duration in seconds")
                .build(),
            request_size_bytes: meter
                .f64_histogram("gjallar_http_request_size_bytes")
                .with_description("Approximate request size in bytes")
                .with_boundaries(size_buckets())
                .build(),
            response_size_bytes: meter
                .f64_histogram("gjallar_http_response_size_bytes")
                .with_description("Response body size in bytes")
                .with_boundaries(size_buckets())
                .build(),
            response_duration_seconds: meter
                .f64_histogram("gjallar_http_response_duration_seconds")
                .with_description("Time to first response byte in seconds")
                .build(),
        }
    }
}

pub fn init_metrics() -> Result<(Arc<HttpMetrics>, Registry), Box<dyn std::error::Error + Send + Sync>>
{
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;

    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();

    global::set_meter_provider(meter_provider);

    let meter = global::meter("gjallar");
    let metrics = Arc::new(HttpMetrics::new(meter));

    Ok((metrics, registry))
}

/// True when a host-matcher value is a plain name, eligible for use as a
/// metric label. Wildcards and placeholders are fuzzy: one fuzzy pattern can
/// admit unbounded label values.
pub fn is_concrete_host(host: &str) -> bool {
    !host.is_empty() && !host.contains('*') && !host.contains('{')
}

/// Wraps every compiled handler to record the request instruments, with
/// per-host cardinality admission.
pub struct MetricsObserver {
    metrics: Arc<HttpMetrics>,
    per_host: bool,
    allow_catch_all_hosts: bool,
    allowed_hosts: HashSet<String>,
    has_https_server: bool,
}

impl MetricsObserver {
    pub fn new(
        cfg: MetricsConfig,
        metrics: Arc<HttpMetrics>,
        allowed_hosts: HashSet<String>,
        has_https_server: bool,
    ) -> Self {
        Self {
            metrics,
            per_host: cfg.per_host,
            allow_catch_all_hosts: cfg.allow_catch_all_hosts,
            allowed_hosts,
            has_https_server,
        }
    }

    /// The host label for a request. Hosts outside the configured route
    /// inventory collapse to "_other" unless the catch-all policy admits
    /// them; HTTPS requests are admitted when any server terminates TLS,
    /// since a certificate had to cover the name.
    pub fn host_label(&self, host: &str, is_tls: bool) -> String {
        let host = host.to_ascii_lowercase();
        if self.allowed_hosts.contains(&host)
            || self.allow_catch_all_hosts
            || (is_tls && self.has_https_server)
        {
            host
        } else {
            "_other".to_string()
        }
    }

    pub fn per_host(&self) -> bool {
        self.per_host
    }

    pub fn wrap(self: &Arc<Self>, server: &str, inner: Arc<dyn Handler>) -> Arc<dyn Handler> {
        Arc::new(ObservedHandler {
            inner,
            server: Arc::from(server),
            observer: self.clone(),
        })
    }
}

struct ObservedHandler {
    inner: Arc<dyn Handler>,
    server: Arc<str>,
    observer: Arc<MetricsObserver>,
}

impl Handler for ObservedHandler {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn call(&self, req: Request<ReqBody>, ctx: RequestContext) -> HandlerFuture {
        let inner = self.inner.clone();
        let obs = self.observer.clone();
        let server = self.server.clone();
        let handler_name = self.inner.name();
        Box::pin(async move {
            let mut base = vec![
                KeyValue::new("server", server.to_string()),
                KeyValue::new("handler", handler_name),
            ];
            if obs.per_host {
                let host = request_host(&req).unwrap_or_default();
                base.push(KeyValue::new("host", obs.host_label(&host, ctx.is_tls)));
            }

            obs.metrics.requests_in_flight.add(1, &base);
            let start = Instant::now();
            let request_size = approximate_request_size(&req);
            let method = req.method().to_string();

            let result = inner.call(req, ctx).await;

            obs.metrics.requests_in_flight.add(-1, &base);
            obs.metrics.requests_total.add(1, &base);

            // the handler returning is the moment headers are ready to go
            // out on the wire
            let ttfb = start.elapsed().as_secs_f64();
            let code = match &result {
                Ok(resp) => resp.status().as_u16(),
                Err(e) => e.status.map(|s| s.as_u16()).unwrap_or(0),
            };
            let mut labels = base.clone();
            labels.push(KeyValue::new("code", code.to_string()));
            labels.push(KeyValue::new("method", method));

            obs.metrics.response_duration_seconds.record(ttfb, &labels);
            obs.metrics.request_size_bytes.record(request_size as f64, &labels);

            match result {
                Ok(resp) => {
                    let metrics = obs.metrics.clone();
                    let labels_done = labels.clone();
                    Ok(resp.map(|body| {
                        CountingBody::new(body, move |bytes| {
                            metrics.response_size_bytes.record(bytes as f64, &labels_done);
                            metrics
                                .request_duration_seconds
                                .record(start.elapsed().as_secs_f64(), &labels_done);
                        })
                        .boxed()
                    }))
                }
                Err(e) => {
                    obs.metrics.request_errors_total.add(1, &base);
                    obs.metrics.response_size_bytes.record(0.0, &labels);
                    obs.metrics
                        .request_duration_seconds
                        .record(start.elapsed().as_secs_f64(), &labels);
                    Err(e)
                }
            }
        })
    }
}

/// Approximate wire size of a request: request line, headers, host and
/// declared body length
pub fn approximate_request_size<B>(req: &Request<B>) -> u64 {
    let mut size = req.method().as_str().len() as u64;
    size += req.uri().to_string().len() as u64;
    size += format!("{:?}", req.version()).len() as u64;
    size += req.uri().host().map(str::len).unwrap_or(0) as u64;
    for (name, value) in req.headers() {
        size += name.as_str().len() as u64 + value.len() as u64;
    }
    if let Some(len) = req
        .headers()
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
    {
        size += len;
    }
    size
}

/// Response body that counts bytes and fires a callback when the body
/// finishes (or is dropped early by a disconnecting client)
pub struct CountingBody<B> {
    inner: B,
    counted: u64,
    on_complete: Option<Box<dyn FnOnce(u64) + Send + Sync>>,
}

impl<B> CountingBody<B> {
    pub fn new(inner: B, on_complete: impl FnOnce(u64) + Send + Sync + 'static) -> Self {
        Self { inner, counted: 0, on_complete: Some(Box::new(on_complete)) }
    }

    fn fire(&mut self) {
        if let Some(cb) = self.on_complete.take() {
            cb(self.counted);
        }
    }
}

impl<B> Body for CountingBody<B>
where
    B: Body<Data = Bytes> + Unpin,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<std::result::Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(Some(Ok(frame))) => {
                if let Some(data) = frame.data_ref() {
                    this.counted += data.len() as u64;
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Poll::Ready(None) => {
                this.fire();
                Poll::Ready(None)
            }
            other => other,
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl<B> Drop for CountingBody<B> {
    fn drop(&mut self) {
        self.fire();
    }
}
