//! Two-tier response cache.
//!
//! Every successful upstream fetch is written twice: a *fresh* copy with a
//! short, data-specific TTL that serves the happy path, and a *shadow* copy
//! with a long TTL that is only read after upstream has failed. The shadow
//! copy is refreshed on every successful fetch and expires independently.
//!
//! Store failures never escape this module: reads degrade to a miss and
//! writes are dropped, both with a logged cache event.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cache::store::SharedStore;
use crate::config::schema::CacheConfig;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::clock::SharedClock;

const FRESH_PREFIX: &str = "stats:fresh:";
const SHADOW_PREFIX: &str = "stats:shadow:";

/// Kind of upstream data, which determines its TTLs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Player,
    PlayerStats,
    Leaderboard,
    Season,
    Match,
}

impl DataKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataKind::Player => "player",
            DataKind::PlayerStats => "player_stats",
            DataKind::Leaderboard => "leaderboard",
            DataKind::Season => "season",
            DataKind::Match => "match",
        }
    }
}

/// A cached value with its write metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub value: T,
    pub stored_at_ms: u64,
    pub ttl_secs: u64,
}

impl<T> CacheEntry<T> {
    /// Age of the entry at `now_ms`.
    pub fn age(&self, now_ms: u64) -> Duration {
        Duration::from_millis(now_ms.saturating_sub(self.stored_at_ms))
    }
}

/// Fresh + shadow cache over a shared store.
#[derive(Clone)]
pub struct TieredCache {
    store: SharedStore,
    config: CacheConfig,
    clock: SharedClock,
    sink: SharedSink,
}

impl TieredCache {
    pub fn new(store: SharedStore, config: CacheConfig, clock: SharedClock, sink: SharedSink) -> Self {
        Self {
            store,
            config,
            clock,
            sink,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Fresh TTL for a data kind.
    pub fn fresh_ttl(&self, kind: DataKind) -> Duration {
        let secs = match kind {
            DataKind::Player => self.config.player_ttl_secs,
            DataKind::PlayerStats => self.config.stats_ttl_secs,
            DataKind::Leaderboard => self.config.leaderboard_ttl_secs,
            DataKind::Season => self.config.season_ttl_secs,
            DataKind::Match => self.config.match_ttl_secs,
        };
        Duration::from_secs(secs)
    }

    /// Shadow TTL, never shorter than the fresh TTL.
    pub fn shadow_ttl(&self, kind: DataKind) -> Duration {
        Duration::from_secs(self.config.shadow_ttl_secs).max(self.fresh_ttl(kind))
    }

    pub async fn get_fresh<T: DeserializeOwned>(&self, kind: DataKind, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.read(&format!("{}{}", FRESH_PREFIX, key)).await;
        match &entry {
            Some(_) => {
                metrics::record_cache_event(kind.as_str(), "hit");
                self.sink.log_event(
                    Category::Cache,
                    Severity::Debug,
                    "cache_hit",
                    json!({ "key": key, "kind": kind.as_str() }),
                );
            }
            None => metrics::record_cache_event(kind.as_str(), "miss"),
        }
        entry
    }

    /// Read the shadow copy kept for failure fallback.
    pub async fn get_stale<T: DeserializeOwned>(&self, kind: DataKind, key: &str) -> Option<CacheEntry<T>> {
        let entry = self.read(&format!("{}{}", SHADOW_PREFIX, key)).await;
        if entry.is_none() {
            metrics::record_cache_event(kind.as_str(), "stale_miss");
        }
        entry
    }

    /// Write both tiers.
    pub async fn put<T: Serialize + Sync>(&self, kind: DataKind, key: &str, value: &T) {
        let now = self.clock.epoch_millis();
        let fresh_ttl = self.fresh_ttl(kind);
        let shadow_ttl = self.shadow_ttl(kind);

        let entry = CacheEntry {
            value,
            stored_at_ms: now,
            ttl_secs: fresh_ttl.as_secs(),
        };

        let fresh_key = format!("{}{}", FRESH_PREFIX, key);
        let shadow_key = format!("{}{}", SHADOW_PREFIX, key);
        if let Err(e) = self.store.set(&fresh_key, &entry, fresh_ttl).await {
            self.store_failure("write", &fresh_key, &e);
            return;
        }
        if let Err(e) = self.store.set(&shadow_key, &entry, shadow_ttl).await {
            self.store_failure("write", &shadow_key, &e);
        }
    }

    /// Drop both tiers for every key starting with `prefix`.
    pub async fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut removed = 0;
        for tier in [FRESH_PREFIX, SHADOW_PREFIX] {
            let full = format!("{}{}", tier, prefix);
            match self.store.clear_by_prefix(&full).await {
                Ok(n) => removed += n,
                Err(e) => self.store_failure("clear", &full, &e),
            }
        }
        removed
    }

    async fn read<T: DeserializeOwned>(&self, full_key: &str) -> Option<CacheEntry<T>> {
        match self.store.get::<CacheEntry<T>>(full_key).await {
            Ok(entry) => entry,
            Err(e) => {
                self.store_failure("read", full_key, &e);
                None
            }
        }
    }

    fn store_failure(&self, op: &str, key: &str, error: &dyn std::error::Error) {
        metrics::record_cache_event("store", "error");
        self.sink.log_event(
            Category::Cache,
            Severity::Warning,
            "cache_store_error",
            json!({ "operation": op, "key": key, "error": error.to_string() }),
        );
    }
}
