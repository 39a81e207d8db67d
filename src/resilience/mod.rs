//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound fetch:
//!     → pacer.rs (minimum spacing between upstream calls)
//!     → retries.rs (bounded attempts, backoff.rs delays)
//!         → circuit_breaker.rs (gate each attempt, record its outcome)
//!         → transport
//! ```
//!
//! # Design Decisions
//! - Breaker and pacer state belong to one client instance, never a global
//! - Time is read through an injected clock so tests can drive it
//! - Retries never bypass the breaker; every attempt asks it first

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod pacer;
pub mod retries;

pub use circuit_breaker::{BreakerPermit, BreakerSnapshot, CircuitBreaker, CircuitState};
pub use clock::{Clock, MockClock, SharedClock, SystemClock};
pub use pacer::RequestPacer;
pub use retries::RetryExecutor;
