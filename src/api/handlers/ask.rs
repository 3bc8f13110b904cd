//! Question answering endpoint.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::api::handlers::error_response;
use crate::types::{AskRequest, Mode};
use crate::AppState;

/// Answer a question about Northeastern University.
///
/// Runs the full pipeline (embed, retrieve, rerank, generate) under the
/// mode's wall-clock budget and returns the answer envelope.
#[utoipa::path(
    post,
    path = "/api/ask",
    request_body = AskRequest,
    responses(
        (status = 200, description = "Answer generated", body = crate::types::AnswerEnvelope),
        (status = 400, description = "Invalid question or mode", body = crate::types::ErrorResponse),
        (status = 502, description = "An upstream collaborator is unavailable", body = crate::types::ErrorResponse)
    ),
    tag = "ask"
)]
pub async fn ask(
    State(state): State<AppState>,
    Json(payload): Json<AskRequest>,
) -> axum::response::Response {
    let trace_id = payload
        .trace_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mode = match payload.mode.as_deref().map(str::parse::<Mode>).transpose() {
        Ok(mode) => mode,
        Err(err) => return error_response(err, &trace_id),
    };

    match state
        .engine
        .answer(&payload.question, mode, Some(trace_id.clone()))
        .await
    {
        Ok(envelope) => Json(envelope).into_response(),
        Err(err) => error_response(err, &trace_id),
    }
}
