use axum::{
    routing::{get, post},
    Router,
};

use crate::AppState;

/// Build the `/api` route table.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/ask", post(crate::api::handlers::ask::ask))
        .route("/info", get(crate::api::handlers::info::info))
        .route(
            "/shards/refresh",
            post(crate::api::handlers::info::refresh_shards),
        )
}
