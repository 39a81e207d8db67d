//! Inbound admission control.
//!
//! Every request is checked against, in order: an active block, the
//! fixed-window rule for its route, and the shared burst bucket. Window and
//! burst denials are reported to the abuse blocker, which may escalate the
//! identifier to a timed block.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;

use crate::config::schema::BurstRule;
use crate::observability::metrics;
use crate::resilience::SharedClock;
use crate::security::abuse::AbuseBlocker;
use crate::security::burst::BurstLimiter;
use crate::security::rate_limit::FixedWindowLimiter;

pub const CLIENT_ID_HEADER: &str = "x-client-id";

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    Blocked,
    RateLimited,
    BurstExceeded,
}

impl DenyReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenyReason::Blocked => "blocked",
            DenyReason::RateLimited => "rate_limited",
            DenyReason::BurstExceeded => "burst_exceeded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdmissionDecision {
    Allowed {
        limit: u64,
        remaining: u64,
        reset_at_ms: u64,
    },
    Denied {
        reason: DenyReason,
        limit: u64,
        reset_at_ms: u64,
        retry_after: Duration,
    },
}

impl AdmissionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, AdmissionDecision::Allowed { .. })
    }
}

pub struct AdmissionControl {
    blocker: Arc<AbuseBlocker>,
    window: Arc<FixedWindowLimiter>,
    burst: Arc<BurstLimiter>,
    burst_rule: BurstRule,
    clock: SharedClock,
    enabled: bool,
}

impl AdmissionControl {
    pub fn new(
        blocker: Arc<AbuseBlocker>,
        window: Arc<FixedWindowLimiter>,
        burst: Arc<BurstLimiter>,
        burst_rule: BurstRule,
        clock: SharedClock,
        enabled: bool,
    ) -> Self {
        Self {
            blocker,
            window,
            burst,
            burst_rule,
            clock,
            enabled,
        }
    }

    pub fn blocker(&self) -> &Arc<AbuseBlocker> {
        &self.blocker
    }

    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.window
    }

    pub async fn admit(&self, identifier: &str, rule_name: &str) -> AdmissionDecision {
        let now = self.clock.epoch_millis();
        if !self.enabled {
            return AdmissionDecision::Allowed {
                limit: u64::MAX,
                remaining: u64::MAX,
                reset_at_ms: now,
            };
        }

        if let Some(block) = self.blocker.blocked_until(identifier).await {
            metrics::record_rate_limited("blocked");
            return self.denied(DenyReason::Blocked, 0, block.blocked_until_ms, now);
        }

        let window = self.window.check(identifier, rule_name).await;
        if !window.allowed {
            if let Some(block) = self
                .blocker
                .record_violation(identifier, window.total_hits, window.limit)
                .await
            {
                return self.denied(DenyReason::Blocked, window.limit, block.blocked_until_ms, now);
            }
            return self.denied(DenyReason::RateLimited, window.limit, window.reset_at_ms, now);
        }

        let burst = self.burst.check_burst(identifier, self.burst_rule).await;
        if !burst.allowed {
            self.blocker
                .record_violation(identifier, window.total_hits, window.limit)
                .await;
            return self.denied(DenyReason::BurstExceeded, window.limit, burst.reset_at_ms, now);
        }

        AdmissionDecision::Allowed {
            limit: window.limit,
            remaining: window.remaining,
            reset_at_ms: window.reset_at_ms,
        }
    }

    fn denied(&self, reason: DenyReason, limit: u64, reset_at_ms: u64, now: u64) -> AdmissionDecision {
        AdmissionDecision::Denied {
            reason,
            limit,
            reset_at_ms,
            retry_after: Duration::from_millis(reset_at_ms.saturating_sub(now)),
        }
    }
}

/// Middleware state: the shared control plus the rule for this route group.
#[derive(Clone)]
pub struct AdmissionLayerState {
    pub control: Arc<AdmissionControl>,
    pub rule: &'static str,
}

/// The `x-client-id` header when present, otherwise the peer IP.
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    headers
        .get(CLIENT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 128)
        .map(|v| format!("client:{}", v))
        .or_else(|| peer.map(|addr| format!("ip:{}", addr.ip())))
        .unwrap_or_else(|| "anonymous".to_string())
}

pub async fn admission_middleware(
    State(state): State<AdmissionLayerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let identifier = client_identifier(request.headers(), peer);

    match state.control.admit(&identifier, state.rule).await {
        AdmissionDecision::Allowed {
            limit,
            remaining,
            reset_at_ms,
        } => {
            let mut response = next.run(request).await;
            if limit != u64::MAX {
                set_limit_headers(response.headers_mut(), limit, remaining, reset_at_ms);
            }
            response
        }
        AdmissionDecision::Denied {
            reason,
            limit,
            reset_at_ms,
            retry_after,
        } => {
            tracing::warn!(rule = state.rule, reason = reason.as_str(), "Request denied by admission control");
            too_many_requests(reason, limit, reset_at_ms, retry_after)
        }
    }
}

fn set_limit_headers(headers: &mut HeaderMap, limit: u64, remaining: u64, reset_at_ms: u64) {
    headers.insert(X_RATELIMIT_LIMIT.clone(), HeaderValue::from(limit));
    headers.insert(X_RATELIMIT_REMAINING.clone(), HeaderValue::from(remaining));
    headers.insert(X_RATELIMIT_RESET.clone(), HeaderValue::from(reset_at_ms.div_ceil(1_000)));
}

fn too_many_requests(reason: DenyReason, limit: u64, reset_at_ms: u64, retry_after: Duration) -> Response {
    let retry_secs = retry_after.as_millis().div_ceil(1_000).max(1) as u64;
    let body = json!({
        "error": "too_many_requests",
        "reason": reason,
        "retry_after_secs": retry_secs,
        "reset_at_ms": reset_at_ms,
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    let headers = response.headers_mut();
    headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_secs));
    set_limit_headers(headers, limit, 0, reset_at_ms);
    response
}
