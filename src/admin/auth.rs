//! Bearer authentication for the admin API.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::Response,
};

use crate::http::response::error_response;
use crate::http::server::AppState;

/// Compare digests so the check does not leak how much of the key matched.
fn key_matches(provided: &str, expected: &str) -> bool {
    blake3::hash(provided.as_bytes()) == blake3::hash(expected.as_bytes())
}

pub async fn admin_auth_middleware(State(state): State<AppState>, request: Request<Body>, next: Next) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token {
        Some(token) if key_matches(token, &state.config.admin.api_key) => next.run(request).await,
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected admin request");
            error_response(StatusCode::UNAUTHORIZED, "unauthorized", "missing or invalid admin key")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matches() {
        assert!(key_matches("secret", "secret"));
        assert!(!key_matches("secre", "secret"));
        assert!(!key_matches("", "secret"));
    }
}
