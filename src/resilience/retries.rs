//! Retry logic.
//!
//! # Responsibilities
//! - Classify errors as retryable or not (see [`UpstreamError::retry_decision`])
//! - Execute retries with exponential backoff + jitter
//! - Honor upstream `Retry-After` hints on 429, capped at `max_delay_ms`
//! - Stop promptly on cancellation
//!
//! Exhaustion returns the last error unchanged; cancellation returns
//! [`UpstreamError::Cancelled`] so callers can tell the two apart.

use std::future::Future;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::config::schema::RetryConfig;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::backoff::calculate_backoff;
use crate::upstream::error::{RetryDecision, UpstreamError};

/// Runs an operation with bounded, jittered retries.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    sink: SharedSink,
    cancel: Option<CancellationToken>,
}

impl RetryExecutor {
    pub fn new(config: RetryConfig, sink: SharedSink) -> Self {
        Self {
            config,
            sink,
            cancel: None,
        }
    }

    /// Attach a cancellation token shared with the owner.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `op` with the configured retry budget.
    pub async fn execute<T, F, Fut>(&self, name: &str, op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.execute_with(name, self.config.max_retries, op).await
    }

    /// Run `op` with at most `max_retries` retries (`max_retries + 1` attempts).
    pub async fn execute_with<T, F, Fut>(&self, name: &str, max_retries: u32, mut op: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if self.is_cancelled() {
                return Err(UpstreamError::Cancelled);
            }

            let error = match op().await {
                Ok(value) => {
                    if attempt > 0 {
                        self.sink.log_event(
                            Category::Upstream,
                            Severity::Info,
                            "retry_recovered",
                            json!({ "operation": name, "retries": attempt }),
                        );
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            let delay = match error.retry_decision() {
                RetryDecision::Stop => {
                    tracing::debug!(operation = %name, error = %error, "Not retrying");
                    return Err(error);
                }
                _ if attempt >= max_retries => {
                    self.sink.create_alert(
                        Severity::Warning,
                        Category::Upstream,
                        "retry_exhausted",
                        json!({
                            "operation": name,
                            "attempts": attempt + 1,
                            "error": error.to_string(),
                            "error_kind": error.label(),
                        }),
                    );
                    return Err(error);
                }
                RetryDecision::RetryAfter(hint) => hint.min(Duration::from_millis(self.config.max_delay_ms)),
                RetryDecision::Retry => calculate_backoff(attempt, &self.config),
            };

            metrics::record_retry(name);
            self.sink.log_event(
                Category::Upstream,
                Severity::Warning,
                "retry_scheduled",
                json!({
                    "operation": name,
                    "attempt": attempt + 1,
                    "delay_ms": delay.as_millis() as u64,
                    "error": error.to_string(),
                }),
            );

            if !self.sleep(delay).await {
                return Err(UpstreamError::Cancelled);
            }
            attempt += 1;
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }

    /// Sleep unless cancelled first; returns false on cancellation.
    async fn sleep(&self, delay: Duration) -> bool {
        match &self.cancel {
            Some(token) => {
                if token.is_cancelled() {
                    return false;
                }
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(delay) => true,
                }
            }
            None => {
                tokio::time::sleep(delay).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemorySink;
    use crate::upstream::error::TransientKind;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn executor() -> (RetryExecutor, MemorySink) {
        let sink = MemorySink::new();
        let config = RetryConfig::default();
        (RetryExecutor::new(config, Arc::new(sink.clone())), sink)
    }

    fn transient() -> UpstreamError {
        UpstreamError::Transient {
            kind: TransientKind::ConnectionReset,
            detail: "reset".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_is_invoked_once() {
        let (exec, sink) = executor();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute("lookup", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(UpstreamError::from_status(404, "no such player", None)) }
            })
            .await;

        assert!(matches!(result, Err(UpstreamError::Client { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count("retry_scheduled"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let (exec, sink) = executor();
        let calls = AtomicU32::new(0);
        let result = exec
            .execute("stats", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(transient())
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(sink.count("retry_scheduled"), 2);
        assert_eq!(sink.count("retry_recovered"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_error() {
        let (exec, sink) = executor();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute("stats", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    Err(UpstreamError::Transient {
                        kind: TransientKind::ServerError(500 + n as u16),
                        detail: format!("attempt {}", n),
                    })
                }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            Err(UpstreamError::Transient {
                kind: TransientKind::ServerError(503),
                detail,
            }) => assert_eq!(detail, "attempt 3"),
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(sink.count("retry_exhausted"), 1);
        assert_eq!(sink.count("retry_recovered"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_overrides_backoff() {
        let (exec, sink) = executor();
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = exec
            .execute("leaderboard", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(UpstreamError::from_status(429, "throttled", Some(Duration::from_secs(12))))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(12));
        assert_eq!(sink.named("retry_scheduled")[0].metadata["delay_ms"], 12_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_hint_is_capped() {
        let (exec, sink) = executor();
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let result = exec
            .execute("leaderboard", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(UpstreamError::from_status(429, "come back tomorrow", Some(Duration::from_secs(86_400))))
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        let waited = start.elapsed();
        assert!(waited >= Duration::from_secs(30) && waited < Duration::from_secs(31), "{:?}", waited);
        assert_eq!(sink.named("retry_scheduled")[0].metadata["delay_ms"], 30_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_is_distinct_from_exhaustion() {
        let (exec, sink) = executor();
        let token = CancellationToken::new();
        let exec = exec.with_cancellation(token.clone());
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = exec
            .execute("stats", || {
                calls.fetch_add(1, Ordering::SeqCst);
                token.cancel();
                async { Err(transient()) }
            })
            .await;

        assert!(matches!(result, Err(UpstreamError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(sink.count("retry_exhausted"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_attempt() {
        let (exec, _) = executor();
        let token = CancellationToken::new();
        token.cancel();
        let exec = exec.with_cancellation(token);
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute("stats", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await;
        assert!(matches!(result, Err(UpstreamError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_single_attempt() {
        let (exec, _) = executor();
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = exec
            .execute_with("health", 0, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(transient()) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
