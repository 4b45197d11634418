//! HTTP error responses.
//!
//! Every failure leaves the API as `{ "error": <short>, "message"?: <detail> }`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::error::AppError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 401 with one of the fixed auth messages.
    #[error("unauthorized: {0}")]
    Unauthorized(&'static str),

    /// 400 `Invalid request` with the validation detail.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// 400 with a specific error and detail.
    #[error("{error}: {message}")]
    BadRequest { error: &'static str, message: &'static str },

    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("{error}: {message}")]
    Unavailable { error: &'static str, message: &'static str },

    /// 500 with a route-specific message; the cause is logged, not returned.
    #[error("{0}")]
    Failed(&'static str),

    /// 500 `Internal server error`.
    #[error("internal: {0}")]
    Internal(String),
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::InvalidRequest(_) | ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Failed(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            ApiError::Unauthorized(msg) | ApiError::NotFound(msg) | ApiError::Failed(msg) => {
                json!({ "error": msg })
            }
            ApiError::InvalidRequest(message) => json!({ "error": "Invalid request", "message": message }),
            ApiError::BadRequest { error, message } | ApiError::Unavailable { error, message } => {
                json!({ "error": error, "message": message })
            }
            ApiError::Internal(detail) => {
                error!(%detail, "unhandled API failure");
                json!({ "error": "Internal server error" })
            }
        };
        (status, Json(body)).into_response()
    }
}
