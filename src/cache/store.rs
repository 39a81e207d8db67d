//! Shared key/value store with per-entry TTL.
//!
//! The resilient client and the inbound limiters only talk to the
//! [`CacheStore`] trait. Counter and bucket mutations go through the atomic
//! [`CacheStore::incr`] and [`CacheStore::compare_and_swap`] primitives so
//! that several service instances sharing one store enforce a single limit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

use crate::resilience::clock::{SharedClock, SystemClock};

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store value could not be (de)serialized: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("value at {key} is not a counter")]
    NotACounter { key: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Async key/value store. Values are JSON strings.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>>;

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()>;

    /// Returns true if a live entry was removed.
    async fn delete(&self, key: &str) -> StoreResult<bool>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove every key starting with `prefix`; returns how many were removed.
    async fn clear_by_prefix(&self, prefix: &str) -> StoreResult<usize>;

    /// Atomically increment a counter. A missing or expired key starts at 0
    /// and receives `ttl`; an existing key keeps its expiry.
    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<u64>;

    /// Replace the value only if the live value equals `expected`
    /// (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
        ttl: Duration,
    ) -> StoreResult<bool>;
}

pub type SharedStore = Arc<dyn CacheStore>;

impl dyn CacheStore {
    /// Typed read.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_raw(key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Typed write.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set_raw(key, raw, ttl).await
    }
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at_ms: u64,
}

impl StoredValue {
    fn is_live(&self, now_ms: u64) -> bool {
        now_ms < self.expires_at_ms
    }
}

/// In-process store backed by a `DashMap`.
///
/// Expiry is evaluated against the injected clock on every access, so a
/// `MockClock` can expire entries without sleeping.
#[derive(Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, StoredValue>>,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: SharedClock) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Number of stored entries, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.epoch_millis();
        let before = self.entries.len();
        self.entries.retain(|_, v| v.is_live(now));
        before.saturating_sub(self.entries.len())
    }

    fn expiry(&self, now_ms: u64, ttl: Duration) -> u64 {
        now_ms.saturating_add((ttl.as_millis() as u64).max(1))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> StoreResult<Option<String>> {
        let now = self.clock.epoch_millis();
        if let Some(entry) = self.entries.get(key) {
            if entry.is_live(now) {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, v| !v.is_live(now));
        Ok(None)
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Duration) -> StoreResult<()> {
        let now = self.clock.epoch_millis();
        self.entries.insert(
            key.to_string(),
            StoredValue {
                value,
                expires_at_ms: self.expiry(now, ttl),
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.epoch_millis();
        Ok(self
            .entries
            .remove(key)
            .map(|(_, v)| v.is_live(now))
            .unwrap_or(false))
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let now = self.clock.epoch_millis();
        Ok(self.entries.get(key).map(|v| v.is_live(now)).unwrap_or(false))
    }

    async fn clear_by_prefix(&self, prefix: &str) -> StoreResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|k, _| !k.starts_with(prefix));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn incr(&self, key: &str, ttl: Duration) -> StoreResult<u64> {
        let now = self.clock.epoch_millis();
        let expires_at_ms = self.expiry(now, ttl);

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| StoredValue {
                value: "0".to_string(),
                expires_at_ms,
            });
        if !entry.is_live(now) {
            *entry = StoredValue {
                value: "0".to_string(),
                expires_at_ms,
            };
        }

        let current: u64 = entry.value.parse().map_err(|_| StoreError::NotACounter {
            key: key.to_string(),
        })?;
        let next = current + 1;
        entry.value = next.to_string();
        Ok(next)
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<&str>,
        new: String,
        ttl: Duration,
    ) -> StoreResult<bool> {
        let now = self.clock.epoch_millis();
        let replacement = StoredValue {
            value: new,
            expires_at_ms: self.expiry(now, ttl),
        };

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let matches = {
                    let current = occupied.get();
                    let live = current.is_live(now).then_some(current.value.as_str());
                    live == expected
                };
                if matches {
                    occupied.insert(replacement);
                }
                Ok(matches)
            }
            Entry::Vacant(vacant) => {
                if expected.is_none() {
                    vacant.insert(replacement);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}
