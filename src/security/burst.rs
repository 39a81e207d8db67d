//! Token-bucket burst control.
//!
//! Buckets are JSON documents in the shared store, updated only through
//! `compare_and_swap`. A lost race re-reads and retries a bounded number of
//! times; a bucket that keeps changing under us is treated as exhausted.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::SharedStore;
use crate::config::schema::BurstRule;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::SharedClock;
use crate::security::rate_limit::hash_identifier;

const MAX_CAS_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
struct TokenBucket {
    tokens: f64,
    last_refill_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BurstResult {
    pub allowed: bool,
    pub remaining_tokens: f64,
    /// When the next token is available, epoch milliseconds.
    pub reset_at_ms: u64,
}

pub struct BurstLimiter {
    store: SharedStore,
    clock: SharedClock,
    sink: SharedSink,
}

impl BurstLimiter {
    pub fn new(store: SharedStore, clock: SharedClock, sink: SharedSink) -> Self {
        Self { store, clock, sink }
    }

    pub async fn check_burst(&self, identifier: &str, rule: BurstRule) -> BurstResult {
        let key = format!("burst:{}", hash_identifier(identifier));

        for _ in 0..MAX_CAS_ATTEMPTS {
            let now = self.clock.epoch_millis();
            let raw = match self.store.get_raw(&key).await {
                Ok(raw) => raw,
                Err(e) => return self.fail_open(rule, now, &e.to_string()),
            };

            let stored = raw
                .as_deref()
                .and_then(|r| serde_json::from_str::<TokenBucket>(r).ok())
                .unwrap_or(TokenBucket {
                    tokens: rule.capacity,
                    last_refill_ms: now,
                });
            let elapsed = now.saturating_sub(stored.last_refill_ms) as f64;
            let tokens = (stored.tokens + elapsed * rule.refill_per_second / 1_000.0).min(rule.capacity);

            if tokens < 1.0 {
                let wait_ms = ((1.0 - tokens) * 1_000.0 / rule.refill_per_second).ceil() as u64;
                metrics::record_rate_limited("burst");
                self.sink.log_event(
                    Category::RateLimit,
                    Severity::Warning,
                    "burst_limit_exceeded",
                    json!({ "client": hash_identifier(identifier), "tokens": tokens }),
                );
                return BurstResult {
                    allowed: false,
                    remaining_tokens: tokens,
                    reset_at_ms: now + wait_ms,
                };
            }

            let next = TokenBucket {
                tokens: tokens - 1.0,
                last_refill_ms: now,
            };
            let serialized = match serde_json::to_string(&next) {
                Ok(s) => s,
                Err(e) => return self.fail_open(rule, now, &e.to_string()),
            };
            let to_full_ms = ((rule.capacity - next.tokens) * 1_000.0 / rule.refill_per_second).ceil() as u64;
            let ttl = Duration::from_millis(to_full_ms.max(1));

            match self
                .store
                .compare_and_swap(&key, raw.as_deref(), serialized, ttl)
                .await
            {
                Ok(true) => {
                    return BurstResult {
                        allowed: true,
                        remaining_tokens: next.tokens,
                        reset_at_ms: now,
                    }
                }
                Ok(false) => continue,
                Err(e) => return self.fail_open(rule, now, &e.to_string()),
            }
        }

        tracing::warn!(client = %hash_identifier(identifier), "Token bucket contention, denying");
        let now = self.clock.epoch_millis();
        BurstResult {
            allowed: false,
            remaining_tokens: 0.0,
            reset_at_ms: now + (1_000.0 / rule.refill_per_second).ceil() as u64,
        }
    }

    fn fail_open(&self, rule: BurstRule, now: u64, error: &str) -> BurstResult {
        self.sink.log_event(
            Category::RateLimit,
            Severity::Warning,
            "burst_store_error",
            json!({ "error": error }),
        );
        BurstResult {
            allowed: true,
            remaining_tokens: rule.capacity,
            reset_at_ms: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::observability::MemorySink;
    use crate::resilience::{Clock, MockClock};
    use std::sync::Arc;

    const RULE: BurstRule = BurstRule {
        capacity: 10.0,
        refill_per_second: 1.0,
    };

    fn limiter() -> (BurstLimiter, MockClock, MemoryStore) {
        let clock = MockClock::new();
        let store = MemoryStore::with_clock(Arc::new(clock.clone()));
        let limiter = BurstLimiter::new(
            Arc::new(store.clone()),
            Arc::new(clock.clone()),
            Arc::new(MemorySink::new()),
        );
        (limiter, clock, store)
    }

    #[tokio::test]
    async fn test_ten_then_deny_then_refill_one() {
        let (limiter, clock, _) = limiter();
        for i in 0..10 {
            assert!(limiter.check_burst("c", RULE).await.allowed, "request {} denied", i);
        }

        let denied = limiter.check_burst("c", RULE).await;
        assert!(!denied.allowed);
        assert_eq!(denied.reset_at_ms, clock.epoch_millis() + 1_000);

        clock.advance(Duration::from_secs(1));
        assert!(limiter.check_burst("c", RULE).await.allowed);
        assert!(!limiter.check_burst("c", RULE).await.allowed);
    }

    #[tokio::test]
    async fn test_refill_is_capped() {
        let (limiter, clock, _) = limiter();
        limiter.check_burst("c", RULE).await;
        clock.advance(Duration::from_secs(3_600));
        let r = limiter.check_burst("c", RULE).await;
        assert_eq!(r.remaining_tokens, 9.0);
    }

    #[tokio::test]
    async fn test_bucket_expires_when_full() {
        let (limiter, clock, store) = limiter();
        limiter.check_burst("c", RULE).await;
        assert_eq!(store.len(), 1);
        clock.advance(Duration::from_secs(1));
        assert_eq!(store.purge_expired(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_overspend() {
        let (limiter, _, _) = limiter();
        let limiter = Arc::new(limiter);
        let mut handles = Vec::new();
        for _ in 0..20 {
            let l = limiter.clone();
            handles.push(tokio::spawn(async move { l.check_burst("c", RULE).await.allowed }));
        }
        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap() {
                allowed += 1;
            }
        }
        assert!(allowed <= 10);
    }
}
