//! Mapping of domain errors onto HTTP responses

use axum::extract::multipart::MultipartError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use vg_core::VgError;
use vg_protocol::ApiEnvelope;

/// Handler result carrying the canonical envelope
pub type ApiResult<T> = Result<Json<ApiEnvelope<T>>, ApiError>;

/// Wrap a payload in a success envelope
pub fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(Json(ApiEnvelope::ok(data)))
}

/// A [`VgError`] on its way to the client
#[derive(Debug)]
pub struct ApiError(pub VgError);

impl ApiError {
    /// HTTP status for the wrapped error
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VgError::Validation(_) => StatusCode::BAD_REQUEST,
            VgError::RemoteApi { .. } | VgError::Transport(_) => StatusCode::BAD_GATEWAY,
            VgError::Conflict { .. }
            | VgError::NotRetryable { .. }
            | VgError::Superseded { .. } => StatusCode::CONFLICT,
            VgError::TokenConsumed { .. } => StatusCode::CONFLICT,
            VgError::TokenExpired { .. } => StatusCode::GONE,
            VgError::UnknownToken | VgError::NotFound(_) => StatusCode::NOT_FOUND,
            VgError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            VgError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            VgError::Config(_) | VgError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<VgError> for ApiError {
    fn from(err: VgError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(VgError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(VgError::Validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(VgError::Validation(rejection.body_text()))
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        Self(VgError::Validation(format!("invalid multipart body: {}", err)))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "Request refused");
        }

        let body = ApiEnvelope::<()>::error(status.as_u16(), self.0.to_string());
        (status, Json(body)).into_response()
    }
}
