//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, calls pass through
//! - Open: upstream assumed down, calls fail fast
//! - Half-Open: a limited number of probe calls test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: first allow() after open_timeout since the last failure
//! Half-Open → Closed: half_open_max_probes successes
//! Half-Open → Open: any failure
//! ```
//!
//! One breaker is owned by one client instance. State lives behind a mutex
//! so concurrent failures cannot both observe a count below the threshold.
//!
//! Callers that may be cancelled hold a [`BreakerPermit`] across the call.
//! A permit dropped without an outcome hands its Half-Open slot back, so an
//! abandoned request cannot pin the breaker in Half-Open.

use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::json;

use crate::config::schema::BreakerConfig;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::clock::SharedClock;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    fn gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct BreakerContext {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<Instant>,
    last_failure_epoch_ms: Option<u64>,
    half_open_probes_used: u32,
    half_open_successes: u32,
    /// Bumped on every entry into Half-Open; survives `reset`.
    half_open_round: u64,
}

impl BreakerContext {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
            last_failure_epoch_ms: None,
            half_open_probes_used: 0,
            half_open_successes: 0,
            half_open_round: 0,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Denied,
    Closed,
    /// Took a Half-Open slot in the given round.
    HalfOpen(u64),
}

/// An admitted call. Report the outcome with [`success`](Self::success) or
/// [`failure`](Self::failure); dropping it unreported frees the slot.
#[must_use = "dropping a permit without an outcome releases it"]
pub struct BreakerPermit<'a> {
    breaker: &'a CircuitBreaker,
    round: Option<u64>,
    settled: bool,
}

impl BreakerPermit<'_> {
    pub fn success(mut self) {
        self.settled = true;
        self.breaker.on_success();
    }

    pub fn failure(mut self) {
        self.settled = true;
        self.breaker.on_failure();
    }
}

impl Drop for BreakerPermit<'_> {
    fn drop(&mut self) {
        if let (false, Some(round)) = (self.settled, self.round) {
            self.breaker.release_slot(round);
        }
    }
}

/// Point-in-time view of the breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    /// Epoch milliseconds of the last recorded failure.
    pub last_failure_at: Option<u64>,
    pub half_open_probes_used: u32,
    /// Time left before an Open breaker admits a probe.
    pub timeout_remaining_ms: Option<u64>,
}

pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerContext>,
    clock: SharedClock,
    sink: SharedSink,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: SharedClock, sink: SharedSink) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerContext::closed()),
            clock,
            sink,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerContext> {
        self.inner.lock().unwrap_or_else(|poisoned| {
            tracing::warn!(breaker = %self.name, "Circuit breaker lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.config.open_timeout_ms)
    }

    /// Whether a call may proceed. An admitted Half-Open call counts as a probe
    /// and keeps its slot until the breaker leaves Half-Open.
    pub fn allow(&self) -> bool {
        self.admit() != Admission::Denied
    }

    /// Admit a call and track it until its outcome is reported.
    pub fn try_acquire(&self) -> Option<BreakerPermit<'_>> {
        let round = match self.admit() {
            Admission::Denied => return None,
            Admission::Closed => None,
            Admission::HalfOpen(round) => Some(round),
        };
        Some(BreakerPermit {
            breaker: self,
            round,
            settled: false,
        })
    }

    fn admit(&self) -> Admission {
        let mut ctx = self.lock();
        match ctx.state {
            CircuitState::Closed => Admission::Closed,
            CircuitState::Open => {
                let elapsed = ctx
                    .last_failure_at
                    .map(|at| self.clock.now().saturating_duration_since(at));
                match elapsed {
                    Some(elapsed) if elapsed >= self.open_timeout() => {
                        self.transition(&mut ctx, CircuitState::HalfOpen);
                        ctx.half_open_probes_used = 1;
                        Admission::HalfOpen(ctx.half_open_round)
                    }
                    _ => Admission::Denied,
                }
            }
            CircuitState::HalfOpen => {
                if ctx.half_open_probes_used < self.config.half_open_max_probes {
                    ctx.half_open_probes_used += 1;
                    Admission::HalfOpen(ctx.half_open_round)
                } else {
                    Admission::Denied
                }
            }
        }
    }

    /// Give back a Half-Open slot, unless the round it was taken in is over.
    fn release_slot(&self, round: u64) {
        let mut ctx = self.lock();
        if ctx.state == CircuitState::HalfOpen && ctx.half_open_round == round {
            ctx.half_open_probes_used = ctx.half_open_probes_used.saturating_sub(1);
            tracing::debug!(
                breaker = %self.name,
                in_use = ctx.half_open_probes_used,
                "Half-open slot released by abandoned call"
            );
        }
    }

    pub fn on_success(&self) {
        let mut ctx = self.lock();
        match ctx.state {
            CircuitState::Closed => ctx.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                ctx.half_open_successes += 1;
                if ctx.half_open_successes >= self.config.half_open_max_probes {
                    self.transition(&mut ctx, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                tracing::debug!(breaker = %self.name, "Late success ignored while open");
            }
        }
    }

    pub fn on_failure(&self) {
        let mut ctx = self.lock();
        ctx.consecutive_failures = ctx.consecutive_failures.saturating_add(1);
        match ctx.state {
            CircuitState::Closed => {
                self.mark_failure(&mut ctx);
                if ctx.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut ctx, CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                self.mark_failure(&mut ctx);
                self.transition(&mut ctx, CircuitState::Open);
            }
            CircuitState::Open => {
                // a call admitted before the trip finished late; the open
                // window is not extended
            }
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let ctx = self.lock();
        let timeout_remaining_ms = match (ctx.state, ctx.last_failure_at) {
            (CircuitState::Open, Some(at)) => {
                let elapsed = self.clock.now().saturating_duration_since(at);
                Some(self.open_timeout().saturating_sub(elapsed).as_millis() as u64)
            }
            _ => None,
        };
        BreakerSnapshot {
            state: ctx.state,
            consecutive_failures: ctx.consecutive_failures,
            last_failure_at: ctx.last_failure_epoch_ms,
            half_open_probes_used: ctx.half_open_probes_used,
            timeout_remaining_ms,
        }
    }

    /// Time until an Open breaker admits a probe; zero otherwise.
    pub fn retry_in(&self) -> Duration {
        self.snapshot()
            .timeout_remaining_ms
            .map(Duration::from_millis)
            .unwrap_or(Duration::ZERO)
    }

    /// Force the breaker back to Closed.
    pub fn reset(&self) {
        let mut ctx = self.lock();
        if ctx.state != CircuitState::Closed {
            self.transition(&mut ctx, CircuitState::Closed);
        }
        let round = ctx.half_open_round;
        *ctx = BreakerContext::closed();
        ctx.half_open_round = round;
    }

    fn mark_failure(&self, ctx: &mut BreakerContext) {
        ctx.last_failure_at = Some(self.clock.now());
        ctx.last_failure_epoch_ms = Some(self.clock.epoch_millis());
    }

    fn transition(&self, ctx: &mut BreakerContext, to: CircuitState) {
        let from = ctx.state;
        ctx.state = to;
        match to {
            CircuitState::Closed => {
                ctx.consecutive_failures = 0;
                ctx.half_open_probes_used = 0;
                ctx.half_open_successes = 0;
            }
            CircuitState::HalfOpen => {
                ctx.half_open_probes_used = 0;
                ctx.half_open_successes = 0;
                ctx.half_open_round = ctx.half_open_round.wrapping_add(1);
            }
            CircuitState::Open => {
                ctx.half_open_probes_used = 0;
                ctx.half_open_successes = 0;
            }
        }

        metrics::record_breaker_transition(from.as_str(), to.as_str());
        metrics::record_breaker_state(to.gauge());

        let severity = match to {
            CircuitState::Open => Severity::Error,
            CircuitState::HalfOpen => Severity::Warning,
            CircuitState::Closed => Severity::Info,
        };
        let metadata = json!({
            "breaker": self.name,
            "from": from.as_str(),
            "to": to.as_str(),
            "consecutive_failures": ctx.consecutive_failures,
        });
        self.sink
            .log_event(Category::Reliability, severity, "breaker_transition", metadata.clone());
        if to == CircuitState::Open {
            self.sink
                .create_alert(Severity::Error, Category::Reliability, "breaker_opened", metadata);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::MemorySink;
    use crate::resilience::clock::MockClock;
    use std::sync::Arc;

    fn breaker() -> (CircuitBreaker, MockClock, MemorySink) {
        let clock = MockClock::new();
        let sink = MemorySink::new();
        let config = BreakerConfig {
            failure_threshold: 5,
            open_timeout_ms: 60_000,
            half_open_max_probes: 3,
        };
        let cb = CircuitBreaker::new("test", config, Arc::new(clock.clone()), Arc::new(sink.clone()));
        (cb, clock, sink)
    }

    fn trip(cb: &CircuitBreaker) {
        for _ in 0..5 {
            assert!(cb.allow());
            cb.on_failure();
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let (cb, _, sink) = breaker();
        for _ in 0..4 {
            cb.on_failure();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.snapshot().last_failure_at.is_some());
        assert_eq!(sink.count("breaker_opened"), 1);
    }

    #[test]
    fn test_success_resets_streak_while_closed() {
        let (cb, _, _) = breaker();
        for _ in 0..4 {
            cb.on_failure();
        }
        cb.on_success();
        cb.on_failure();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 1);
    }

    #[test]
    fn test_full_recovery_cycle() {
        let (cb, clock, _) = breaker();
        trip(&cb);
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance_millis(10_000);
        assert!(!cb.allow(), "still inside open timeout");
        assert_eq!(cb.snapshot().timeout_remaining_ms, Some(50_000));

        clock.advance_millis(50_001);
        assert!(cb.allow());
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        cb.on_success();
        assert!(cb.allow());
        cb.on_success();
        assert!(cb.allow());
        cb.on_success();

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Closed);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.half_open_probes_used, 0);
    }

    #[test]
    fn test_half_open_probe_limit() {
        let (cb, clock, _) = breaker();
        trip(&cb);
        clock.advance_millis(60_000);

        assert!(cb.allow());
        assert!(cb.allow());
        assert!(cb.allow());
        assert!(!cb.allow(), "probe budget spent");
        assert_eq!(cb.snapshot().half_open_probes_used, 3);
    }

    #[test]
    fn test_failure_in_half_open_reopens() {
        let (cb, clock, sink) = breaker();
        trip(&cb);
        clock.advance_millis(60_001);
        assert!(cb.allow());
        assert!(cb.allow());

        cb.on_failure();
        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::Open);
        assert_eq!(snap.half_open_probes_used, 0);
        assert_eq!(snap.timeout_remaining_ms, Some(60_000));
        assert!(!cb.allow());
        assert_eq!(sink.count("breaker_opened"), 2);
    }

    #[test]
    fn test_every_transition_is_reported() {
        let (cb, clock, sink) = breaker();
        trip(&cb);
        clock.advance_millis(60_000);
        cb.allow();
        cb.on_success();
        cb.on_success();
        cb.on_success();

        let transitions: Vec<_> = sink
            .named("breaker_transition")
            .into_iter()
            .map(|e| format!("{}->{}", e.metadata["from"].as_str().unwrap(), e.metadata["to"].as_str().unwrap()))
            .collect();
        assert_eq!(transitions, vec!["closed->open", "open->half_open", "half_open->closed"]);
        assert!(sink
            .named("breaker_transition")
            .iter()
            .all(|e| e.category == Category::Reliability));
    }

    #[test]
    fn test_abandoned_half_open_calls_release_their_slots() {
        let (cb, clock, _) = breaker();
        trip(&cb);
        clock.advance_millis(60_000);

        let permits: Vec<_> = (0..3).map(|_| cb.try_acquire().expect("slot available")).collect();
        assert!(cb.try_acquire().is_none(), "all slots taken");
        drop(permits);

        let snap = cb.snapshot();
        assert_eq!(snap.state, CircuitState::HalfOpen);
        assert_eq!(snap.half_open_probes_used, 0);

        for _ in 0..3 {
            cb.try_acquire().expect("slot freed").success();
        }
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[test]
    fn test_permit_from_earlier_round_is_ignored() {
        let (cb, clock, _) = breaker();
        trip(&cb);
        clock.advance_millis(60_000);

        let stale = cb.try_acquire().expect("first round");
        cb.try_acquire().expect("first round").failure();
        assert_eq!(cb.state(), CircuitState::Open);

        clock.advance_millis(60_000);
        let _current = cb.try_acquire().expect("second round");
        drop(stale);
        assert_eq!(cb.snapshot().half_open_probes_used, 1);
    }

    #[test]
    fn test_closed_permit_reports_outcomes() {
        let (cb, _, _) = breaker();
        for _ in 0..5 {
            cb.try_acquire().expect("closed").failure();
        }
        assert_eq!(cb.state(), CircuitState::Open);
        assert!(cb.try_acquire().is_none());
    }

    #[test]
    fn test_reset() {
        let (cb, _, _) = breaker();
        trip(&cb);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().last_failure_at, None);
        assert!(cb.allow());
    }
}
