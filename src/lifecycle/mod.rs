//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Validated config → store, transport, client → health, limiters → Gateway
//!
//! Shutdown (shutdown.rs):
//!     trigger() → servers drain, health monitor exits, retry sleeps abort
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger + StatsClient::cancel
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Offline mode is announced at warn level so it is never mistaken for live data

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{build_gateway, Gateway, StartupError};
