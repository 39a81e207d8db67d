//! Fixed-window inbound rate limiting.
//!
//! Counters live in the shared [`CacheStore`] under
//! `rl:{rule}:{hash(identifier)}:{window_start_ms}` and are bumped with the
//! store's atomic `incr`, so every instance sharing the store enforces one
//! limit. Raw identifiers never appear in keys.
//!
//! A store failure lets the request through and logs an event.

use std::time::Duration;

use serde::Serialize;
use serde_json::json;

use crate::cache::SharedStore;
use crate::config::schema::{LimitsConfig, RateLimitRule};
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::SharedClock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u64,
    /// End of the current window, epoch milliseconds.
    pub reset_at_ms: u64,
    /// Hits counted in the current window, including this one.
    pub total_hits: u64,
    pub limit: u64,
}

/// Short stable digest of an identifier for use in store keys.
pub fn hash_identifier(identifier: &str) -> String {
    blake3::hash(identifier.as_bytes()).to_hex()[..24].to_string()
}

pub struct FixedWindowLimiter {
    store: SharedStore,
    clock: SharedClock,
    sink: SharedSink,
    config: LimitsConfig,
}

impl FixedWindowLimiter {
    pub fn new(store: SharedStore, config: LimitsConfig, clock: SharedClock, sink: SharedSink) -> Self {
        Self {
            store,
            clock,
            sink,
            config,
        }
    }

    /// Resolve a named rule, falling back to `default`.
    pub fn rule(&self, name: &str) -> Option<RateLimitRule> {
        self.config.rule(name)
    }

    /// Count one hit against the named rule.
    pub async fn check(&self, identifier: &str, rule_name: &str) -> RateLimitResult {
        match self.rule(rule_name) {
            Some(rule) => self.check_with(identifier, rule_name, rule).await,
            None => {
                tracing::warn!(rule = rule_name, "Unknown rate limit rule, allowing");
                RateLimitResult {
                    allowed: true,
                    remaining: u64::MAX,
                    reset_at_ms: self.clock.epoch_millis(),
                    total_hits: 0,
                    limit: u64::MAX,
                }
            }
        }
    }

    /// Count one hit against an explicit rule. `scope` separates counters of
    /// different rules for the same identifier.
    pub async fn check_with(&self, identifier: &str, scope: &str, rule: RateLimitRule) -> RateLimitResult {
        let now = self.clock.epoch_millis();
        let (window_start, reset_at_ms) = window_bounds(now, rule.window_ms);
        let key = counter_key(scope, identifier, window_start);
        let ttl = Duration::from_millis(reset_at_ms.saturating_sub(now).max(1));

        let count = match self.store.incr(&key, ttl).await {
            Ok(count) => count,
            Err(e) => {
                self.sink.log_event(
                    Category::RateLimit,
                    Severity::Warning,
                    "rate_limit_store_error",
                    json!({ "rule": scope, "error": e.to_string() }),
                );
                return RateLimitResult {
                    allowed: true,
                    remaining: rule.max_requests,
                    reset_at_ms,
                    total_hits: 0,
                    limit: rule.max_requests,
                };
            }
        };

        if count > rule.max_requests {
            metrics::record_rate_limited("window");
            self.sink.log_event(
                Category::RateLimit,
                Severity::Warning,
                "rate_limit_exceeded",
                json!({
                    "rule": scope,
                    "client": hash_identifier(identifier),
                    "hits": count,
                    "limit": rule.max_requests,
                    "reset_at_ms": reset_at_ms,
                }),
            );
            return RateLimitResult {
                allowed: false,
                remaining: 0,
                reset_at_ms,
                total_hits: count,
                limit: rule.max_requests,
            };
        }

        RateLimitResult {
            allowed: true,
            remaining: rule.max_requests - count,
            reset_at_ms,
            total_hits: count,
            limit: rule.max_requests,
        }
    }

    /// Current window state without counting a hit.
    pub async fn status(&self, identifier: &str, rule_name: &str) -> Option<RateLimitResult> {
        let rule = self.rule(rule_name)?;
        let now = self.clock.epoch_millis();
        let (window_start, reset_at_ms) = window_bounds(now, rule.window_ms);
        let key = counter_key(rule_name, identifier, window_start);

        let count = match self.store.get_raw(&key).await {
            Ok(raw) => raw.and_then(|v| v.parse::<u64>().ok()).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, "Rate limit status unavailable");
                0
            }
        };
        Some(RateLimitResult {
            allowed: count < rule.max_requests,
            remaining: rule.max_requests.saturating_sub(count),
            reset_at_ms,
            total_hits: count,
            limit: rule.max_requests,
        })
    }

    /// Clear every rule's counters for an identifier; returns keys removed.
    pub async fn reset(&self, identifier: &str) -> usize {
        let hash = hash_identifier(identifier);
        let mut removed = 0;
        for name in self.config.rules.keys() {
            match self.store.clear_by_prefix(&format!("rl:{}:{}:", name, hash)).await {
                Ok(n) => removed += n,
                Err(e) => tracing::warn!(rule = %name, error = %e, "Failed to reset rate limit"),
            }
        }
        removed
    }
}

fn window_bounds(now_ms: u64, window_ms: u64) -> (u64, u64) {
    let window = window_ms.max(1);
    let start = now_ms / window * window;
    (start, start + window)
}

fn counter_key(scope: &str, identifier: &str, window_start: u64) -> String {
    format!("rl:{}:{}:{}", scope, hash_identifier(identifier), window_start)
}
