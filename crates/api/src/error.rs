//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use domain::DomainError;
use projections::ProjectionError;
use saga::{ErrorKind, SagaError};
use thiserror::Error;

/// API-level error type that maps to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed path or body the saga never saw.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Saga(#[from] SagaError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),
}

/// Status code for each failure class.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Capacity | ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::PaymentDeclined => StatusCode::PAYMENT_REQUIRED,
        ErrorKind::GatewayTimeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (kind, message) = match self {
            ApiError::BadRequest(msg) => (ErrorKind::Validation, msg),
            ApiError::Saga(err) => (err.kind(), err.to_string()),
            ApiError::Projection(err) => (ErrorKind::Internal, err.to_string()),
        };

        let status = status_for(kind);
        metrics::counter!("api_errors_total", "kind" => kind.as_str()).increment(1);
        if status.is_server_error() {
            tracing::error!(error = %message, %kind, "request failed");
        }

        let body = serde_json::json!({ "error": message, "kind": kind });
        (status, axum::Json(body)).into_response()
    }
}

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError::Saga(err.into())
    }
}
