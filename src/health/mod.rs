//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Periodic (active.rs), admin on demand, or GET /health via the cached report:
//!     aggregator.rs
//!     → breaker snapshot
//!     → cache round trip (disposable key)
//!     → one upstream probe, skipped while the breaker refuses calls
//!     → HealthReport { healthy | degraded | unhealthy }
//! ```
//!
//! # Design Decisions
//! - Probes feed the breaker like any other call but never retry
//! - The monitor only reports status changes, not every tick
//! - The public endpoint reuses a recent report instead of probing per request

pub mod active;
pub mod aggregator;

pub use active::HealthMonitor;
pub use aggregator::{HealthAggregator, HealthReport, HealthStatus};
