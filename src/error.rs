use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use std::time::Duration;
use thiserror::Error;

use crate::store::StoreError;

/// Every failure an endpoint can report, one variant per HTTP status class.
#[derive(Debug, Error)]
pub enum AppError {
    // gate saturated, upstream never called
    #[error("Server is busy, please retry later")]
    ThrottleTimeout { retry_after: Duration },

    #[error("Upstream quota or rate limit exceeded: {message}")]
    UpstreamRateLimited { retry_after: Duration, message: String },

    #[error("Generation failed: {0}")]
    Upstream(String),

    #[error("{0}")]
    NoContent(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::ThrottleTimeout { .. } | AppError::UpstreamRateLimited { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AppError::Upstream(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::NoContent(_) => StatusCode::BAD_GATEWAY,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AppError::ThrottleTimeout { retry_after }
            | AppError::UpstreamRateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn unauthenticated() -> Self {
        AppError::Unauthorized("Not logged in".to_string())
    }

    pub fn conversation_not_found() -> Self {
        AppError::NotFound("Conversation not found".to_string())
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UsernameTaken(_) => AppError::Conflict("Username already exists".to_string()),
            other => {
                tracing::error!("storage failure: {}", other);
                AppError::Internal("storage failure".to_string())
            }
        }
    }
}

// Malformed or incomplete JSON bodies get the same {"detail"} shape as every other error
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = self.retry_after();
        let body = Json(serde_json::json!({ "detail": self.to_string() }));

        let mut response = (status, body).into_response();
        if let Some(delay) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&delay.as_secs().to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
