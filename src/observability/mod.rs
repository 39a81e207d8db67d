//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → events.rs (structured events and alerts through an EventSink)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → logging.rs (tracing subscriber: stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```

pub mod events;
pub mod logging;
pub mod metrics;

pub use events::{Category, EventSink, MemorySink, SharedSink, Severity, TracingSink};
