//! Point-in-time health of the upstream integration.
//!
//! Combines three signals: the breaker state, a cache round trip with a
//! disposable key, and one lightweight upstream probe. The probe is skipped
//! when the breaker refuses calls and never uses the retry budget.
//!
//! The last report is kept. Unauthenticated callers go through
//! [`HealthAggregator::check_cached`], which reuses it while it is younger
//! than `max_age` and lets only one caller at a time refresh it, so polling
//! `/health` cannot turn into upstream traffic.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;

use crate::cache::SharedStore;
use crate::observability::{metrics, Category, SharedSink, Severity};
use crate::resilience::{CircuitState, SharedClock};
use crate::upstream::{StatsClient, UpstreamError};

const PROBE_KEY_PREFIX: &str = "health:probe:";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }

    fn gauge(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 0.0,
            HealthStatus::Degraded => 1.0,
            HealthStatus::Unhealthy => 2.0,
        }
    }

    /// `unhealthy` when both checks failed, `degraded` when one failed or the
    /// breaker is open.
    pub fn derive(cache_ok: bool, api_ok: bool, breaker: CircuitState) -> Self {
        match (cache_ok, api_ok) {
            (false, false) => HealthStatus::Unhealthy,
            (true, true) if breaker != CircuitState::Open => HealthStatus::Healthy,
            _ => HealthStatus::Degraded,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub breaker_state: CircuitState,
    pub cache_ok: bool,
    pub api_ok: bool,
    pub consecutive_failures: u32,
    pub last_failure_at: Option<u64>,
    pub timeout_remaining_ms: Option<u64>,
    /// Epoch milliseconds.
    pub checked_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_error: Option<String>,
}

pub struct HealthAggregator {
    client: Arc<StatsClient>,
    store: SharedStore,
    clock: SharedClock,
    sink: SharedSink,
    probe_timeout: Duration,
    max_age: Duration,
    last: RwLock<Option<HealthReport>>,
    refresh: Mutex<()>,
}

impl HealthAggregator {
    pub fn new(
        client: Arc<StatsClient>,
        store: SharedStore,
        clock: SharedClock,
        sink: SharedSink,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            client,
            store,
            clock,
            sink,
            probe_timeout,
            max_age: Duration::from_secs(5),
            last: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// How long `check_cached` may reuse a report.
    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    /// The most recent report from any check.
    pub fn latest(&self) -> Option<HealthReport> {
        match self.last.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// The last report if it is recent enough, otherwise a new check.
    /// Concurrent callers wait for a single refresh.
    pub async fn check_cached(&self) -> HealthReport {
        if let Some(report) = self.recent() {
            return report;
        }
        let _refresh = self.refresh.lock().await;
        if let Some(report) = self.recent() {
            return report;
        }
        self.check().await
    }

    fn recent(&self) -> Option<HealthReport> {
        let now = self.clock.epoch_millis();
        let max_age = self.max_age.as_millis() as u64;
        self.latest()
            .filter(|report| now.saturating_sub(report.checked_at) < max_age)
    }

    /// Run every check now and remember the result.
    pub async fn check(&self) -> HealthReport {
        let cache_ok = self.cache_round_trip().await;

        let probe = self.client.probe(self.probe_timeout).await;
        let api_ok = probe.is_ok();
        let api_error = match &probe {
            Ok(()) => None,
            Err(UpstreamError::BreakerOpen { .. }) => Some("probe skipped: circuit open".to_string()),
            Err(e) => Some(e.to_string()),
        };

        let snapshot = self.client.breaker().snapshot();
        let status = HealthStatus::derive(cache_ok, api_ok, snapshot.state);
        metrics::record_health_status(status.gauge());

        let report = HealthReport {
            status,
            breaker_state: snapshot.state,
            cache_ok,
            api_ok,
            consecutive_failures: snapshot.consecutive_failures,
            last_failure_at: snapshot.last_failure_at,
            timeout_remaining_ms: snapshot.timeout_remaining_ms,
            checked_at: self.clock.epoch_millis(),
            api_error,
        };
        match self.last.write() {
            Ok(mut slot) => *slot = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }
        report
    }

    /// Write, read back and delete a throwaway key.
    async fn cache_round_trip(&self) -> bool {
        let key = format!("{}{}", PROBE_KEY_PREFIX, uuid::Uuid::new_v4());
        let token = self.clock.epoch_millis().to_string();

        let outcome = async {
            self.store.set_raw(&key, token.clone(), Duration::from_secs(10)).await?;
            let read = self.store.get_raw(&key).await?;
            self.store.delete(&key).await?;
            Ok::<bool, crate::cache::StoreError>(read.as_deref() == Some(token.as_str()))
        }
        .await;

        match outcome {
            Ok(true) => true,
            Ok(false) => {
                self.sink.log_event(
                    Category::Health,
                    Severity::Warning,
                    "cache_probe_mismatch",
                    json!({ "key": key }),
                );
                false
            }
            Err(e) => {
                self.sink.log_event(
                    Category::Health,
                    Severity::Error,
                    "cache_probe_failed",
                    json!({ "error": e.to_string() }),
                );
                false
            }
        }
    }
}
