//! Temporary blocking of abusive identifiers.
//!
//! A block is a store entry whose TTL equals the block duration, so it ends
//! by itself. Violations are counted per identifier in a TTL window; crossing
//! the threshold, or one window with far more hits than the limit, blocks.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::SharedStore;
use crate::config::schema::AbuseConfig;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::SharedClock;
use crate::security::rate_limit::hash_identifier;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedIdentifier {
    pub identifier: String,
    pub blocked_until_ms: u64,
    pub reason: String,
}

pub struct AbuseBlocker {
    store: SharedStore,
    config: AbuseConfig,
    clock: SharedClock,
    sink: SharedSink,
}

fn block_key(identifier: &str) -> String {
    format!("abuse:block:{}", hash_identifier(identifier))
}

fn violation_key(identifier: &str) -> String {
    format!("abuse:violations:{}", hash_identifier(identifier))
}

impl AbuseBlocker {
    pub fn new(store: SharedStore, config: AbuseConfig, clock: SharedClock, sink: SharedSink) -> Self {
        Self {
            store,
            config,
            clock,
            sink,
        }
    }

    pub async fn is_blocked(&self, identifier: &str) -> bool {
        self.blocked_until(identifier).await.is_some()
    }

    /// The active block for an identifier, if any.
    pub async fn blocked_until(&self, identifier: &str) -> Option<BlockedIdentifier> {
        match self.store.get::<BlockedIdentifier>(&block_key(identifier)).await {
            Ok(entry) => entry.filter(|b| b.blocked_until_ms > self.clock.epoch_millis()),
            Err(e) => {
                tracing::warn!(error = %e, "Block lookup failed, allowing");
                None
            }
        }
    }

    pub async fn block(&self, identifier: &str, duration: Duration, reason: &str) -> BlockedIdentifier {
        let entry = BlockedIdentifier {
            identifier: identifier.to_string(),
            blocked_until_ms: self.clock.epoch_millis() + duration.as_millis() as u64,
            reason: reason.to_string(),
        };
        if let Err(e) = self.store.set(&block_key(identifier), &entry, duration).await {
            tracing::error!(error = %e, "Failed to persist block");
        }

        metrics::record_block();
        self.sink.create_alert(
            Severity::Warning,
            Category::Security,
            "identifier_blocked",
            json!({
                "client": hash_identifier(identifier),
                "reason": reason,
                "duration_secs": duration.as_secs(),
                "blocked_until_ms": entry.blocked_until_ms,
            }),
        );
        entry
    }

    /// Returns true if a block was lifted.
    pub async fn unblock(&self, identifier: &str) -> bool {
        self.clear_violations(identifier).await;
        match self.store.delete(&block_key(identifier)).await {
            Ok(removed) => {
                if removed {
                    self.sink.log_event(
                        Category::Security,
                        Severity::Info,
                        "identifier_unblocked",
                        json!({ "client": hash_identifier(identifier) }),
                    );
                }
                removed
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to remove block");
                false
            }
        }
    }

    /// Count a rate-limit violation; blocks and returns the block when the
    /// identifier crosses a threshold.
    pub async fn record_violation(&self, identifier: &str, hits: u64, limit: u64) -> Option<BlockedIdentifier> {
        if !self.config.enabled {
            return None;
        }

        let window = Duration::from_secs(self.config.violation_window_secs);
        let violations = match self.store.incr(&violation_key(identifier), window).await {
            Ok(n) => n,
            Err(e) => {
                tracing::warn!(error = %e, "Violation counter unavailable");
                return None;
            }
        };

        let flood = hits > limit.saturating_mul(self.config.hits_multiplier);
        let repeat = violations >= self.config.violation_threshold;
        if !flood && !repeat {
            return None;
        }

        let reason = if flood {
            format!("{} hits against a limit of {}", hits, limit)
        } else {
            format!("{} rate limit violations", violations)
        };
        self.clear_violations(identifier).await;
        Some(
            self.block(identifier, Duration::from_secs(self.config.block_duration_secs), &reason)
                .await,
        )
    }

    /// A counter left behind only expires with its window, so failures are
    /// logged and otherwise ignored.
    async fn clear_violations(&self, identifier: &str) {
        if let Err(e) = self.store.delete(&violation_key(identifier)).await {
            tracing::warn!(
                error = %e,
                client = %hash_identifier(identifier),
                "Failed to clear violation counter"
            );
        }
    }
}
