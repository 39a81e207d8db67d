//! statsgate
//!
//! A caching, rate-limiting gateway for a game statistics API.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ security::admission ──▶ upstream::client ──▶ Stats API
//!                     │                 │                      │
//!                     │           block / window /        cache (fresh + shadow)
//!                     │             burst limits          pacer, retries, breaker
//!                     ▼
//!               /health  ◀── health::aggregator (breaker + cache + probe)
//!
//!     Operator ──▶ admin (bearer key): breaker, blocks, limits, cache
//! ```

use std::path::PathBuf;

use clap::Parser;

use statsgate::config::load_config;
use statsgate::lifecycle::build_gateway;
use statsgate::observability::{logging, metrics};

#[derive(Parser)]
#[command(name = "statsgate", version, about = "Caching, rate-limiting gateway for a game statistics API")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "statsgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = load_config(&args.config)?;

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %args.config.display(), "statsgate starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        mode = ?config.upstream.mode,
        request_timeout_secs = config.listener.request_timeout_secs,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let gateway = build_gateway(config)?;
    gateway.run().await?;
    Ok(())
}
