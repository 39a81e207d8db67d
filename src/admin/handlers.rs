use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::health::HealthStatus;
use crate::http::response::error_response;
use crate::http::server::AppState;
use crate::resilience::{BreakerSnapshot, CircuitState};
use crate::security::BlockedIdentifier;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub transport: &'static str,
    pub uptime_secs: u64,
    pub breaker_state: CircuitState,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        transport: state.client.transport_name(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        breaker_state: state.client.breaker().state(),
    })
}

pub async fn get_breaker(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    Json(state.client.breaker().snapshot())
}

pub async fn reset_breaker(State(state): State<AppState>) -> Json<BreakerSnapshot> {
    tracing::info!("Circuit breaker reset through admin API");
    state.client.breaker().reset();
    Json(state.client.breaker().snapshot())
}

pub async fn get_health(State(state): State<AppState>) -> Response {
    let report = state.health.check().await;
    let status = match report.status {
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };
    (status, Json(report)).into_response()
}

pub async fn get_block(State(state): State<AppState>, Path(identifier): Path<String>) -> Response {
    match state.admission.blocker().blocked_until(&identifier).await {
        Some(block) => Json(block).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "not_blocked", "identifier is not blocked"),
    }
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub identifier: String,
    pub duration_secs: u64,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn create_block(State(state): State<AppState>, Json(body): Json<BlockRequest>) -> Response {
    if body.identifier.trim().is_empty() || body.duration_secs == 0 {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "identifier and a positive duration_secs are required",
        );
    }
    let reason = body.reason.as_deref().unwrap_or("manual");
    let block: BlockedIdentifier = state
        .admission
        .blocker()
        .block(&body.identifier, Duration::from_secs(body.duration_secs), reason)
        .await;
    (StatusCode::CREATED, Json(block)).into_response()
}

pub async fn delete_block(State(state): State<AppState>, Path(identifier): Path<String>) -> Response {
    if state.admission.blocker().unblock(&identifier).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(StatusCode::NOT_FOUND, "not_blocked", "identifier is not blocked")
    }
}

#[derive(Debug, Deserialize)]
pub struct RuleQuery {
    pub rule: Option<String>,
}

pub async fn get_limit(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
    Query(query): Query<RuleQuery>,
) -> Response {
    let rule = query.rule.as_deref().unwrap_or("default");
    match state.admission.limiter().status(&identifier, rule).await {
        Some(status) => Json(json!({
            "identifier": identifier,
            "rule": rule,
            "limit": status.limit,
            "remaining": status.remaining,
            "total_hits": status.total_hits,
            "reset_at_ms": status.reset_at_ms,
        }))
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, "unknown_rule", format!("no rule named {}", rule)),
    }
}

pub async fn reset_limit(State(state): State<AppState>, Path(identifier): Path<String>) -> Json<serde_json::Value> {
    let removed = state.admission.limiter().reset(&identifier).await;
    Json(json!({ "identifier": identifier, "counters_removed": removed }))
}

pub async fn invalidate_player(State(state): State<AppState>, Path(player_id): Path<String>) -> Json<serde_json::Value> {
    let removed = state.client.invalidate_player(&player_id).await;
    Json(json!({ "player_id": player_id, "entries_removed": removed }))
}
