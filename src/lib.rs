//! Resilient gateway in front of a rate-limited game statistics API.

pub mod admin;
pub mod cache;
pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod security;
pub mod upstream;

pub use config::GatewayConfig;
pub use http::HttpServer;
pub use lifecycle::{build_gateway, Gateway, Shutdown};
pub use upstream::StatsClient;
