//! Caching subsystem.
//!
//! # Data Flow
//! ```text
//! StatsClient
//!     → tiered.rs (fresh + shadow copies, per-kind TTLs)
//!     → store.rs (CacheStore trait; MemoryStore in process)
//!
//! Rate limiters
//!     → store.rs directly (incr, compare_and_swap)
//! ```

pub mod store;
pub mod tiered;

pub use store::{CacheStore, MemoryStore, SharedStore, StoreError, StoreResult};
pub use tiered::{CacheEntry, DataKind, TieredCache};
