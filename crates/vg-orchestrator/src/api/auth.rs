//! Bearer token check for the HTTP API

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use vg_core::api_token::validate_token;
use vg_core::VgError;

use super::{ApiError, SharedState};

/// Token presented in an `Authorization: Bearer` header
fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
}

/// Reject requests that do not carry the daemon's API token
pub async fn require_token(State(state): State<SharedState>, request: Request, next: Next) -> Response {
    match bearer_token(&request) {
        Some(token) if validate_token(token, &state.api_token) => next.run(request).await,
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "Rejected request with invalid API token");
            ApiError(VgError::Unauthenticated("invalid API token".into())).into_response()
        }
        None => ApiError(VgError::Unauthenticated("missing bearer token".into())).into_response(),
    }
}
