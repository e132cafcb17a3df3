//! Unified error handling with Sentry integration.
//!
//! Every handler returns `Result<T, AppError>`. Server-class errors are
//! captured to Sentry before the response is built; clients only ever see a
//! generic JSON body.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use cart_insights_etl::StoreError;

/// Application-level error type for the query API.
#[derive(Debug, Error)]
pub enum AppError {
    /// The store failed to answer.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A query parameter is malformed or out of range.
    #[error("Invalid parameter {parameter}: {message}")]
    InvalidParameter {
        parameter: &'static str,
        message: String,
    },
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameter: Option<&'a str>,
    message: &'a str,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Store(err) if err.is_connection() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidParameter { .. } => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        // Don't expose internal error details to clients
        let body = match &self {
            Self::InvalidParameter { parameter, message } => ErrorBody {
                error: "invalid_parameter",
                parameter: Some(*parameter),
                message,
            },
            _ if status == StatusCode::SERVICE_UNAVAILABLE => ErrorBody {
                error: "service_unavailable",
                parameter: None,
                message: "Service temporarily unavailable",
            },
            _ => ErrorBody {
                error: "internal_error",
                parameter: None,
                message: "Internal server error",
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;
