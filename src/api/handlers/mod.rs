//! HTTP request handlers.

/// Question answering endpoint.
pub mod ask;
/// Runtime info and cache management endpoints.
pub mod info;

use axum::response::IntoResponse;
use axum::Json;

use crate::types::{AppError, ErrorResponse};

/// Render an error with its trace id attached. Messages stay short and
/// never leak upstream secrets or stack traces.
pub(crate) fn error_response(err: AppError, trace_id: &str) -> axum::response::Response {
    tracing::warn!(trace_id, error = %err, "request failed");
    let status = err.status_code();
    let body = ErrorResponse {
        error: err.to_string(),
        trace_id: trace_id.to_string(),
    };
    (status, Json(body)).into_response()
}
