//! API error types and JSON error response formatting.
//!
//! Every failure leaves the service as `{error, message}` with a status code
//! derived from the stage that failed.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use twider_core::error::TwiderError;

/// JSON error response body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g. "bad_request").
    pub error: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type that maps to HTTP status codes and JSON responses.
#[derive(Debug)]
pub enum ApiError {
    /// 400 Bad Request - missing or out-of-range parameters.
    BadRequest(String),
    /// 404 Not Found - unknown route.
    NotFound(String),
    /// 500 Internal Server Error - unexpected server error.
    Internal(String),
    /// 502 Bad Gateway - the embedding service or the index failed.
    BadGateway(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "dependency_failure", msg),
        };

        if status.is_server_error() {
            error!(status = status.as_u16(), %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

impl From<TwiderError> for ApiError {
    fn from(err: TwiderError) -> Self {
        match err {
            TwiderError::Validation(msg) | TwiderError::Config(msg) => ApiError::BadRequest(msg),
            ref e if e.is_dependency_failure() => ApiError::BadGateway(e.to_string()),
            e => ApiError::Internal(e.to_string()),
        }
    }
}
