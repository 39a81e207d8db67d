//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum Router with all handlers
//! - Wire up middleware (tracing, timeout, request ID, admission control)
//! - Bind server to listener and stop on the shutdown broadcast
//!
//! # Routes
//! ```text
//! GET /health                                   (not rate limited, cached report)
//! GET /v1/players/{platform}/{player}           rule "lookup"
//! GET /v1/players/{platform}/{player}/stats     rule "lookup"
//! GET /v1/leaderboards/{platform}/{mode}        rule "leaderboard"
//! GET /v1/seasons/{platform}/current            rule "default"
//! GET /v1/matches/{platform}/{match_id}         rule "default"
//! ```

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::health::{HealthAggregator, HealthStatus};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::response::{error_response, fetched_response};
use crate::security::{admission_middleware, AdmissionControl, AdmissionLayerState};
use crate::upstream::{GameMode, Platform, StatsClient};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<StatsClient>,
    pub health: Arc<HealthAggregator>,
    pub admission: Arc<AdmissionControl>,
    pub config: Arc<GatewayConfig>,
    pub started_at: Instant,
}

/// Public HTTP server.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(state: AppState) -> Self {
        let router = Self::build_router(state);
        Self { router }
    }

    /// The fully layered router, for embedding and tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(state: AppState) -> Router {
        let timeout = Duration::from_secs(state.config.listener.request_timeout_secs);
        let limited = |rule: &'static str| {
            middleware::from_fn_with_state(
                AdmissionLayerState {
                    control: state.admission.clone(),
                    rule,
                },
                admission_middleware,
            )
        };

        let lookup = Router::new()
            .route("/v1/players/{platform}/{player}", get(player_by_name))
            .route("/v1/players/{platform}/{player}/stats", get(player_stats))
            .route_layer(limited("lookup"));
        let leaderboard = Router::new()
            .route("/v1/leaderboards/{platform}/{mode}", get(leaderboard))
            .route_layer(limited("leaderboard"));
        let general = Router::new()
            .route("/v1/seasons/{platform}/current", get(current_season))
            .route("/v1/matches/{platform}/{match_id}", get(match_summary))
            .route_layer(limited("default"));

        Router::new()
            .route("/health", get(health))
            .merge(lookup)
            .merge(leaderboard)
            .merge(general)
            .fallback(not_found)
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(propagate_request_id_layer())
                    .layer(TimeoutLayer::new(timeout)),
            )
    }

    /// Run the server, accepting connections on the given listener.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SeasonQuery {
    pub season: Option<String>,
}

fn parse_path<T: FromStr<Err = String>>(value: &str) -> Result<T, Response> {
    value
        .parse()
        .map_err(|e: String| error_response(StatusCode::BAD_REQUEST, "invalid_request", e))
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.health.check_cached().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}

async fn player_by_name(State(state): State<AppState>, Path((platform, name)): Path<(String, String)>) -> Response {
    let platform: Platform = match parse_path(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    fetched_response(state.client.fetch_player_by_name(&name, platform).await)
}

async fn player_stats(
    State(state): State<AppState>,
    Path((platform, player_id)): Path<(String, String)>,
    Query(query): Query<SeasonQuery>,
) -> Response {
    let platform: Platform = match parse_path(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    fetched_response(
        state
            .client
            .fetch_player_stats(&player_id, platform, query.season.as_deref())
            .await,
    )
}

async fn leaderboard(
    State(state): State<AppState>,
    Path((platform, mode)): Path<(String, String)>,
    Query(query): Query<SeasonQuery>,
) -> Response {
    let platform: Platform = match parse_path(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    let mode: GameMode = match parse_path(&mode) {
        Ok(m) => m,
        Err(response) => return response,
    };
    fetched_response(
        state
            .client
            .fetch_leaderboard(platform, mode, query.season.as_deref())
            .await,
    )
}

async fn current_season(State(state): State<AppState>, Path(platform): Path<String>) -> Response {
    let platform: Platform = match parse_path(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    fetched_response(state.client.fetch_current_season(platform).await)
}

async fn match_summary(State(state): State<AppState>, Path((platform, match_id)): Path<(String, String)>) -> Response {
    let platform: Platform = match parse_path(&platform) {
        Ok(p) => p,
        Err(response) => return response,
    };
    fetched_response(state.client.fetch_match(&match_id, platform).await)
}

async fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "not_found", "no such route")
}
