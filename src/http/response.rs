//! Response rendering.
//!
//! # Responsibilities
//! - Turn a client [`Fetched`] outcome into an HTTP response
//! - Map upstream failures to gateway status codes
//! - Mark stale data so callers can tell it apart
//!
//! # Design Decisions
//! - Stale data is still a 200; the `x-data-source` header says where it came from
//! - Upstream credential problems (401/403) surface as 502, never as the caller's fault
//! - Timeouts map to 504 Gateway Timeout, other outages to 503

use axum::{
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::upstream::{Fetched, TransientKind, UpstreamError};

pub const X_DATA_SOURCE: &str = "x-data-source";

/// JSON error body with a machine-readable code.
pub fn error_response(status: StatusCode, code: &str, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": code, "message": message.into() }))).into_response()
}

pub fn fetched_response<T: Serialize>(fetched: Fetched<T>) -> Response {
    let source = fetched.source();
    let mut response = match fetched {
        Fetched::Live(value) | Fetched::Cached(value) => {
            (StatusCode::OK, Json(json!({ "data": value, "source": source }))).into_response()
        }
        Fetched::Stale {
            value,
            stored_at_ms,
            cause,
        } => {
            let mut response = (
                StatusCode::OK,
                Json(json!({
                    "data": value,
                    "source": source,
                    "stale": { "stored_at_ms": stored_at_ms, "cause": cause.to_string() },
                })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::WARNING, HeaderValue::from_static("110 - \"Response is Stale\""));
            response
        }
        Fetched::NotFound => error_response(StatusCode::NOT_FOUND, "not_found", "resource not found upstream"),
        Fetched::Unavailable(error) => upstream_error_response(&error),
    };
    if let Ok(value) = HeaderValue::from_str(source) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(X_DATA_SOURCE), value);
    }
    response
}

pub fn upstream_error_response(error: &UpstreamError) -> Response {
    match error {
        UpstreamError::Client { status: 400, detail } => {
            error_response(StatusCode::BAD_REQUEST, "invalid_request", detail.clone())
        }
        UpstreamError::Client { status, .. } if *status == 401 || *status == 403 => error_response(
            StatusCode::BAD_GATEWAY,
            "upstream_rejected",
            "upstream rejected the gateway's credentials",
        ),
        UpstreamError::Client { detail, .. } => error_response(StatusCode::BAD_GATEWAY, "upstream_rejected", detail.clone()),
        UpstreamError::Transient {
            kind: TransientKind::Timeout,
            ..
        } => error_response(StatusCode::GATEWAY_TIMEOUT, "upstream_timeout", error.to_string()),
        UpstreamError::BreakerOpen { retry_in } => {
            let mut response = error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "upstream_unavailable",
                "upstream temporarily disabled after repeated failures",
            );
            let secs = retry_in.as_secs().max(1);
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
            response
        }
        UpstreamError::InvalidResponse { .. } => {
            error_response(StatusCode::BAD_GATEWAY, "upstream_invalid", error.to_string())
        }
        UpstreamError::Transient { .. }
        | UpstreamError::RateLimited { .. }
        | UpstreamError::Unrecoverable { .. }
        | UpstreamError::Cancelled => {
            error_response(StatusCode::SERVICE_UNAVAILABLE, "upstream_unavailable", error.to_string())
        }
    }
}
