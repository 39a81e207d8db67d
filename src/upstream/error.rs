//! Upstream error taxonomy and retry classification.

use std::time::Duration;

use thiserror::Error;

/// Why a transient failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Timeout,
    ServerError(u16),
    ConnectionReset,
    Connect,
}

/// Errors produced by an upstream call.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Bad input or a definitive 4xx answer. Never retried.
    #[error("upstream rejected request ({status}): {detail}")]
    Client { status: u16, detail: String },

    /// Timeout, 5xx or dropped connection. Retried within budget.
    #[error("transient upstream failure ({kind:?}): {detail}")]
    Transient { kind: TransientKind, detail: String },

    /// Upstream throttled us (429). Retried, honoring the hint.
    #[error("upstream rate limited: {detail}")]
    RateLimited {
        retry_after: Option<Duration>,
        detail: String,
    },

    /// The breaker refused the call; the operation never ran.
    #[error("circuit breaker open, retry in {retry_in:?}")]
    BreakerOpen { retry_in: Duration },

    /// DNS or certificate failures that no retry can fix.
    #[error("unrecoverable network error: {detail}")]
    Unrecoverable { detail: String },

    /// Upstream answered 2xx with a payload we could not use.
    #[error("invalid upstream payload: {detail}")]
    InvalidResponse { detail: String },

    /// The caller cancelled the operation.
    #[error("operation cancelled")]
    Cancelled,
}

/// What the retry executor should do with an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the computed backoff.
    Retry,
    /// Retry after an upstream-provided delay.
    RetryAfter(Duration),
    /// Give up immediately.
    Stop,
}

impl UpstreamError {
    pub fn timeout(after: Duration) -> Self {
        UpstreamError::Transient {
            kind: TransientKind::Timeout,
            detail: format!("no response within {}ms", after.as_millis()),
        }
    }

    /// Build the error for a non-2xx status.
    pub fn from_status(status: u16, detail: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let detail = detail.into();
        match status {
            408 => UpstreamError::Transient {
                kind: TransientKind::Timeout,
                detail,
            },
            429 => UpstreamError::RateLimited { retry_after, detail },
            500..=599 => UpstreamError::Transient {
                kind: TransientKind::ServerError(status),
                detail,
            },
            _ => UpstreamError::Client { status, detail },
        }
    }

    pub fn retry_decision(&self) -> RetryDecision {
        match self {
            UpstreamError::Transient { .. } => RetryDecision::Retry,
            UpstreamError::RateLimited {
                retry_after: Some(delay),
                ..
            } => RetryDecision::RetryAfter(*delay),
            UpstreamError::RateLimited { retry_after: None, .. } => RetryDecision::Retry,
            UpstreamError::Client { .. }
            | UpstreamError::BreakerOpen { .. }
            | UpstreamError::Unrecoverable { .. }
            | UpstreamError::InvalidResponse { .. }
            | UpstreamError::Cancelled => RetryDecision::Stop,
        }
    }

    /// Whether this outcome says something bad about upstream health.
    ///
    /// `None` means the breaker must not be fed at all: the call either never
    /// reached upstream or was abandoned by the caller.
    pub fn breaker_failure(&self) -> Option<bool> {
        match self {
            UpstreamError::BreakerOpen { .. } | UpstreamError::Cancelled => None,
            UpstreamError::Client { .. } => Some(false),
            UpstreamError::Transient { .. }
            | UpstreamError::RateLimited { .. }
            | UpstreamError::Unrecoverable { .. }
            | UpstreamError::InvalidResponse { .. } => Some(true),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, UpstreamError::Client { status: 404, .. })
    }

    /// Short label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            UpstreamError::Client { .. } => "client",
            UpstreamError::Transient { .. } => "transient",
            UpstreamError::RateLimited { .. } => "rate_limited",
            UpstreamError::BreakerOpen { .. } => "breaker_open",
            UpstreamError::Unrecoverable { .. } => "unrecoverable",
            UpstreamError::InvalidResponse { .. } => "invalid_response",
            UpstreamError::Cancelled => "cancelled",
        }
    }
}
