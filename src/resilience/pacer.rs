//! Outbound request pacing.
//!
//! Upstream enforces a per-key request budget, so consecutive calls are kept
//! at least `min_interval` apart. Each caller reserves the next free slot
//! under a lock and then sleeps outside it, so concurrent callers queue up one
//! interval apart instead of waking together.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::schema::PacerConfig;

#[derive(Debug)]
pub struct RequestPacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
}

impl RequestPacer {
    pub fn new(config: &PacerConfig) -> Self {
        Self::with_interval(Duration::from_millis(config.min_interval_ms))
    }

    pub fn with_interval(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next request may be sent.
    pub async fn before_request(&self) {
        let slot = self.reserve();
        if slot > Instant::now() {
            tracing::trace!(delay_ms = (slot - Instant::now()).as_millis() as u64, "Pacing upstream request");
            tokio::time::sleep_until(slot).await;
        }
    }

    fn reserve(&self) -> Instant {
        let now = Instant::now();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let slot = match *last {
            Some(prev) => (prev + self.min_interval).max(now),
            None => now,
        };
        *last = Some(slot);
        slot
    }
}
