use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use riskgate_core::error::{self, ApiError, ConfigError, StoreError};

/// Internal error type that converts to structured API responses
#[derive(Debug)]
pub enum AppError {
    /// Validation error (400)
    Validation {
        message: String,
        field: Option<String>,
        received: Option<serde_json::Value>,
        docs_hint: Option<String>,
    },
    /// Rejected config update (400); the active config is unchanged
    InvalidConfig {
        source: ConfigError,
        received: serde_json::Value,
    },
    /// Missing or invalid credentials (401)
    Unauthorized {
        message: String,
        docs_hint: Option<String>,
    },
    /// Authenticated but not allowed (403)
    Forbidden {
        message: String,
        docs_hint: Option<String>,
    },
    /// Not found (404)
    NotFound { resource: String },
    /// Trust store write failed (503 when unreachable, 500 otherwise)
    Store(StoreError),
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        AppError::Store(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let request_id = uuid::Uuid::now_v7().to_string();

        let (status, api_error) = match self {
            AppError::Validation {
                message,
                field,
                received,
                docs_hint,
            } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::VALIDATION_FAILED.to_string(),
                    message,
                    field,
                    received,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::InvalidConfig { source, received } => (
                StatusCode::BAD_REQUEST,
                ApiError {
                    error: error::codes::INVALID_CONFIG.to_string(),
                    message: source.to_string(),
                    field: source.field().map(str::to_string),
                    received: Some(received),
                    request_id,
                    docs_hint: Some(
                        "Send a partial JSON object; nested tables merge field by field. \
                         The previous configuration is still active."
                            .to_string(),
                    ),
                },
            ),
            AppError::Unauthorized { message, docs_hint } => (
                StatusCode::UNAUTHORIZED,
                ApiError {
                    error: error::codes::UNAUTHORIZED.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::Forbidden { message, docs_hint } => (
                StatusCode::FORBIDDEN,
                ApiError {
                    error: error::codes::FORBIDDEN.to_string(),
                    message,
                    field: None,
                    received: None,
                    request_id,
                    docs_hint,
                },
            ),
            AppError::NotFound { resource } => (
                StatusCode::NOT_FOUND,
                ApiError {
                    error: error::codes::NOT_FOUND.to_string(),
                    message: format!("{resource} not found"),
                    field: None,
                    received: None,
                    request_id,
                    docs_hint: None,
                },
            ),
            AppError::Store(err) => {
                tracing::error!(error = %err, request_id = %request_id, "trust store write failed");
                let status = match err {
                    StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                    StoreError::Query(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (
                    status,
                    ApiError {
                        error: error::codes::INTERNAL_ERROR.to_string(),
                        message: "Trust store write failed".to_string(),
                        field: None,
                        received: None,
                        request_id,
                        docs_hint: Some("Retry once the database is reachable.".to_string()),
                    },
                )
            }
        };

        (status, Json(api_error)).into_response()
    }
}
