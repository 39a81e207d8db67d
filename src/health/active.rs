//! Periodic health checking.
//!
//! # Responsibilities
//! - Run the aggregator on a fixed interval, keeping its cached report warm
//! - Report status changes (not every tick) through the event sink
//! - Stop on the shutdown broadcast

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::schema::HealthConfig;
use crate::health::aggregator::{HealthAggregator, HealthReport, HealthStatus};
use crate::observability::{Category, SharedSink, Severity};

pub struct HealthMonitor {
    aggregator: Arc<HealthAggregator>,
    config: HealthConfig,
    sink: SharedSink,
}

impl HealthMonitor {
    pub fn new(aggregator: Arc<HealthAggregator>, config: HealthConfig, sink: SharedSink) -> Self {
        Self {
            aggregator,
            config,
            sink,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Periodic health checks disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health monitor starting");

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        let mut previous: Option<HealthStatus> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.aggregator.check().await;
                    self.report_change(previous, &report);
                    previous = Some(report.status);
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    fn report_change(&self, previous: Option<HealthStatus>, report: &HealthReport) {
        if previous == Some(report.status) {
            tracing::debug!(status = report.status.as_str(), "Health unchanged");
            return;
        }

        let metadata = json!({
            "from": previous.map(|s| s.as_str()),
            "to": report.status.as_str(),
            "breaker_state": report.breaker_state,
            "cache_ok": report.cache_ok,
            "api_ok": report.api_ok,
        });
        let severity = match report.status {
            HealthStatus::Healthy => Severity::Info,
            HealthStatus::Degraded => Severity::Warning,
            HealthStatus::Unhealthy => Severity::Critical,
        };
        self.sink
            .log_event(Category::Health, severity, "health_status_changed", metadata.clone());
        if report.status == HealthStatus::Unhealthy {
            self.sink
                .create_alert(Severity::Critical, Category::Health, "upstream_unhealthy", metadata);
        }
    }
}
