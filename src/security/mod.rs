//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → admission.rs (middleware, resolves the client identifier)
//!         → abuse.rs (active block?)
//!         → rate_limit.rs (fixed window for the route's rule)
//!         → burst.rs (token bucket)
//!     → Pass to handler, or 429 with Retry-After
//! ```
//!
//! # Design Decisions
//! - All counters live in the shared store so instances agree on limits
//! - Fail open on store errors: an unavailable store must not take the API down
//! - Identifiers are hashed before they become store keys

pub mod abuse;
pub mod admission;
pub mod burst;
pub mod rate_limit;

pub use abuse::{AbuseBlocker, BlockedIdentifier};
pub use admission::{admission_middleware, AdmissionControl, AdmissionDecision, AdmissionLayerState, DenyReason};
pub use burst::{BurstLimiter, BurstResult};
pub use rate_limit::{FixedWindowLimiter, RateLimitResult};
