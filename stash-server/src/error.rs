//! Maps [`StashError`] onto HTTP status codes and JSON error bodies.
//! Nothing upstream of this module should match on `StashError`
//! variants directly.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::json;
use stash_core::error::StashError;

pub struct ApiError(pub StashError);

impl From<StashError> for ApiError {
    fn from(err: StashError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            StashError::NotFound => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" }))).into_response()
            }
            StashError::Conflict(info) => (
                StatusCode::CONFLICT,
                Json(json!({
                    "error": "version conflict",
                    "current_value": BASE64.encode(&info.current_value),
                    "current_format": info.current_format,
                    "current_version": info.current_version,
                })),
            )
                .into_response(),
            StashError::SecretsNotConfigured => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "secrets are not configured" })),
            )
                .into_response(),
            StashError::InvalidZkPayload => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "invalid zero-knowledge payload" })),
            )
                .into_response(),
            StashError::DecryptionFailed => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response(),
            StashError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "unauthorized" })),
            )
                .into_response(),
            StashError::Denied => (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "permission denied" })),
            )
                .into_response(),
            StashError::InvalidConfig(msg) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid configuration: {msg}") })),
            )
                .into_response(),
            StashError::Cancelled => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "operation cancelled" })),
            )
                .into_response(),
            StashError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "internal error" })),
            )
                .into_response(),
        }
    }
}
