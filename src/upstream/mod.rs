//! Upstream statistics API.
//!
//! # Data Flow
//! ```text
//! StatsClient (client.rs)
//!     → Transport trait (transport.rs)
//!         → HttpTransport: reqwest, bearer credential, JSON:API
//!         → OfflineTransport: synthetic documents (offline.rs)
//!     → JSON:API parsing into domain types (types.rs)
//! ```
//!
//! # Design Decisions
//! - Every failure is classified once, at the transport boundary (error.rs)
//! - Offline mode is never a silent fallback; it is chosen by configuration

pub mod client;
pub mod error;
pub mod offline;
pub mod transport;
pub mod types;

pub use client::StatsClient;
pub use error::{RetryDecision, TransientKind, UpstreamError};
pub use offline::OfflineTransport;
pub use transport::{HttpTransport, Transport, UpstreamRequest, UpstreamResponse};
pub use types::{Fetched, GameMode, LeaderboardEntry, MatchSummary, ModeStats, Platform, Player, PlayerStats, Season};
