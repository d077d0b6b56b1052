use http::StatusCode;
use hyper::body::Bytes;
use hyper::Response;
use prometheus::{Encoder, TextEncoder};

use crate::error::{AppError, Result};
use crate::handler::{full_body, RespBody};

pub fn handle_metrics(registry: &prometheus::Registry) -> Result<Response<RespBody>> {
    let encoder = TextEncoder::new();
    let metric_families = registry.gather();
    let mut buffer = Vec::new();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| AppError::Config(format!("Failed to encode metrics: {e}")))?;

    let mut resp = Response::new(full_body(Bytes::from(buffer)));
    *resp.status_mut() = StatusCode::OK;
    if let Ok(value) = http::HeaderValue::from_str(encoder.format_type()) {
        resp.headers_mut().insert(http::header::CONTENT_TYPE, value);
    }
    Ok(resp)
}
