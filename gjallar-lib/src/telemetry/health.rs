use http::StatusCode;
use hyper::body::Bytes;
use hyper::Response;
use serde_json::json;

use crate::handler::{full_body, RespBody};

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<RespBody> {
    let bytes = serde_json::to_vec(&body).unwrap_or_else(|_| b"{}".to_vec());
    let mut resp = Response::new(full_body(Bytes::from(bytes)));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    resp
}

/// Health check response - always 200 while the process is running
pub fn health_check_response() -> Response<RespBody> {
    json_response(StatusCode::OK, json!({"status": "healthy"}))
}

/// Readiness check - 200 once the application has started its listeners,
/// 503 before that and again during shutdown
pub fn ready_check_response(started: bool) -> Response<RespBody> {
    if started {
        json_response(StatusCode::OK, json!({"status": "ready"}))
    } else {
        json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            json!({"status": "not_ready", "reason": "servers_not_started"}),
        )
    }
}

/// Liveness check - always 200 while the process is running
pub fn live_check_response() -> Response<RespBody> {
    json_response(StatusCode::OK, json!({"status": "alive"}))
}
