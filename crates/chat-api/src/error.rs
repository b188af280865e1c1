//! HTTP error mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_core::CoreError;
use thiserror::Error;
use tracing::error;

/// API-surface errors.
#[derive(Error, Debug)]
pub enum ApiError {
    /// No subject on the request.
    #[error("request carries no subject")]
    Unauthenticated,

    /// Transport-level validation failure (lengths, limits).
    #[error("{0}")]
    Validation(String),

    /// Anything the service reported.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ApiError::Unauthenticated => (StatusCode::UNAUTHORIZED, self.to_string()),
            ApiError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ApiError::Core(core) => match core {
                CoreError::NotAuthorized { .. } => (StatusCode::FORBIDDEN, core.to_string()),
                CoreError::NotFound { .. } => (StatusCode::NOT_FOUND, core.to_string()),
                CoreError::InvalidArgument(_) => {
                    (StatusCode::UNPROCESSABLE_ENTITY, core.to_string())
                }
                CoreError::Authz(_) | CoreError::Repository(_) => {
                    error!(error = %core, "request failed");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal error".to_string(),
                    )
                }
            },
        };

        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
