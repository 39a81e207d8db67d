//! Structured operational events.
//!
//! Every breaker transition, retry, stale cache serve and rate-limit
//! violation is reported through an [`EventSink`]. The default sink writes
//! `tracing` records; [`MemorySink`] keeps events in memory so embedding code
//! and tests can assert on them.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;

/// Subsystem an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Reliability,
    Cache,
    Upstream,
    RateLimit,
    Security,
    Health,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Reliability => "reliability",
            Category::Cache => "cache",
            Category::Upstream => "upstream",
            Category::RateLimit => "rate_limit",
            Category::Security => "security",
            Category::Health => "health",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Destination for structured events and alerts.
pub trait EventSink: Send + Sync {
    fn log_event(&self, category: Category, severity: Severity, message: &str, metadata: Value);

    fn create_alert(&self, severity: Severity, domain: Category, message: &str, metadata: Value);
}

pub type SharedSink = Arc<dyn EventSink>;

/// Sink that forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn log_event(&self, category: Category, severity: Severity, message: &str, metadata: Value) {
        match severity {
            Severity::Debug => tracing::debug!(%category, %metadata, "{}", message),
            Severity::Info => tracing::info!(%category, %metadata, "{}", message),
            Severity::Warning => tracing::warn!(%category, %metadata, "{}", message),
            Severity::Error | Severity::Critical => {
                tracing::error!(%category, ?severity, %metadata, "{}", message)
            }
        }
    }

    fn create_alert(&self, severity: Severity, domain: Category, message: &str, metadata: Value) {
        match severity {
            Severity::Debug | Severity::Info => {
                tracing::info!(alert = true, %domain, %metadata, "{}", message)
            }
            Severity::Warning => tracing::warn!(alert = true, %domain, %metadata, "{}", message),
            Severity::Error | Severity::Critical => {
                tracing::error!(alert = true, %domain, ?severity, %metadata, "{}", message)
            }
        }
    }
}

/// A recorded event or alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedEvent {
    pub alert: bool,
    pub category: Category,
    pub severity: Severity,
    pub message: String,
    pub metadata: Value,
}

/// Sink that keeps every event in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    events: Arc<Mutex<Vec<RecordedEvent>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Events whose message equals `message`.
    pub fn named(&self, message: &str) -> Vec<RecordedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.message == message)
            .collect()
    }

    pub fn count(&self, message: &str) -> usize {
        self.named(message).len()
    }

    fn push(&self, event: RecordedEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

impl EventSink for MemorySink {
    fn log_event(&self, category: Category, severity: Severity, message: &str, metadata: Value) {
        self.push(RecordedEvent {
            alert: false,
            category,
            severity,
            message: message.to_string(),
            metadata,
        });
    }

    fn create_alert(&self, severity: Severity, domain: Category, message: &str, metadata: Value) {
        self.push(RecordedEvent {
            alert: true,
            category: domain,
            severity,
            message: message.to_string(),
            metadata,
        });
    }
}
