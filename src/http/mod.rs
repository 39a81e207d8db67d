//! HTTP surface of the gateway.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, trace)
//!     → security::admission (block / window / burst per route group)
//!     → upstream::StatsClient (cache, breaker, retries)
//!     → response.rs (status mapping, data source headers)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::{error_response, fetched_response, upstream_error_response, X_DATA_SOURCE};
pub use server::{AppState, HttpServer};
