//! Operator API, served on its own listener behind a bearer key.
//!
//! ```text
//! GET    /admin/status
//! GET    /admin/health
//! GET    /admin/breaker
//! POST   /admin/breaker/reset
//! POST   /admin/blocks
//! GET    /admin/blocks/{identifier}
//! DELETE /admin/blocks/{identifier}
//! GET    /admin/limits/{identifier}?rule=
//! DELETE /admin/limits/{identifier}
//! DELETE /admin/cache/players/{player_id}
//! ```

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/health", get(get_health))
        .route("/admin/breaker", get(get_breaker))
        .route("/admin/breaker/reset", post(reset_breaker))
        .route("/admin/blocks", post(create_block))
        .route("/admin/blocks/{identifier}", get(get_block).delete(delete_block))
        .route("/admin/limits/{identifier}", get(get_limit).delete(reset_limit))
        .route("/admin/cache/players/{player_id}", delete(invalidate_player))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .with_state(state)
}
