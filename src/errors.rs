use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures inside the push subsystem.
///
/// Expired subscriptions and failed deliveries are not errors; they are
/// reported as [`crate::notification::push::DeliveryOutcome`] values.
#[derive(Debug, Error)]
pub enum PushError {
    /// Missing or invalid VAPID material. Disables the subsystem, not the process.
    #[error("push configuration error: {0}")]
    Configuration(String),

    /// Malformed key or signing primitive failure. Aborts one delivery attempt.
    #[error("signing error: {0}")]
    Signing(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("missing or invalid bearer token")]
    Unauthorized,

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("push notifications are not configured")]
    PushNotConfigured,

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, code, msg) = match &self {
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "authentication_error",
                "invalid_token",
                "invalid or missing token".to_string(),
            ),
            AppError::Validation(reason) => (
                StatusCode::BAD_REQUEST,
                "invalid_request_error",
                "validation_failed",
                reason.clone(),
            ),
            AppError::PushNotConfigured => (
                StatusCode::SERVICE_UNAVAILABLE,
                "configuration_error",
                "push_not_configured",
                "VAPID keys not configured".to_string(),
            ),
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal_server_error",
                    "internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "message": msg,
                "type": error_type,
                "code": code,
            }
        }));

        let mut response = (status, body).into_response();

        if matches!(self, AppError::Unauthorized) {
            response.headers_mut().insert(
                "www-authenticate",
                axum::http::HeaderValue::from_static("Bearer"),
            );
        }

        response
    }
}
