//! Time source abstraction.
//!
//! Breaker timeouts use the monotonic [`Clock::now`]; limiter windows and
//! store TTLs use wall-clock milliseconds so that several instances sharing a
//! store agree on window boundaries.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Source of monotonic and wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Monotonic instant.
    fn now(&self) -> Instant;

    /// Milliseconds since the UNIX epoch.
    fn epoch_millis(&self) -> u64;
}

/// Real system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn epoch_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same elapsed time, so a clone handed to a component can
/// be advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    start: Instant,
    start_epoch_ms: u64,
    elapsed: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Default wall-clock origin, aligned to a minute boundary.
    pub const DEFAULT_EPOCH_MS: u64 = 1_699_999_980_000;

    pub fn new() -> Self {
        Self::at_epoch_millis(Self::DEFAULT_EPOCH_MS)
    }

    /// Start the wall clock at a specific epoch time.
    pub fn at_epoch_millis(epoch_ms: u64) -> Self {
        Self {
            start: Instant::now(),
            start_epoch_ms: epoch_ms,
            elapsed: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }

    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed()
    }

    fn epoch_millis(&self) -> u64 {
        self.start_epoch_ms + self.elapsed().as_millis() as u64
    }
}

/// Shared clock handle used across subsystems.
pub type SharedClock = Arc<dyn Clock>;
