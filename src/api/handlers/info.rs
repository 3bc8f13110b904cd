//! Runtime info and cache management endpoints.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use uuid::Uuid;

use crate::api::handlers::error_response;
use crate::AppState;

/// Non-sensitive runtime information: topology, default mode, cache stats.
#[utoipa::path(
    get,
    path = "/api/info",
    responses((status = 200, description = "Runtime info")),
    tag = "info"
)]
pub async fn info(State(state): State<AppState>) -> Json<serde_json::Value> {
    let engine = &state.engine;
    let shard_cache = engine.cached_shards().map(|cached| {
        serde_json::json!({
            "shard_count": cached.shards.len(),
            "fetched_at": cached.fetched_at_utc,
        })
    });

    Json(serde_json::json!({
        "default_mode": engine.default_mode().to_string(),
        "topology": if engine.is_unified() { "unified" } else { "sharded" },
        "embed_cache": engine.embed_cache_stats(),
        "shard_cache": shard_cache,
    }))
}

/// Force a shard-list refresh, bypassing the TTL cache.
///
/// Operators call this after re-ingestion; replacement is atomic so
/// in-flight requests keep the previous complete list.
#[utoipa::path(
    post,
    path = "/api/shards/refresh",
    responses(
        (status = 200, description = "Shard list refreshed"),
        (status = 502, description = "Store unreachable", body = crate::types::ErrorResponse)
    ),
    tag = "info"
)]
pub async fn refresh_shards(State(state): State<AppState>) -> axum::response::Response {
    let trace_id = Uuid::new_v4().to_string();
    match state.engine.refresh_shards().await {
        Ok(shard_count) => Json(serde_json::json!({ "shard_count": shard_count })).into_response(),
        Err(err) => error_response(err, &trace_id),
    }
}
