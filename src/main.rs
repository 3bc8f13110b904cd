//! N.E.A.R Server Binary
//!
//! This is the main entry point for running N.E.A.R as a standalone server.
//! For library usage, import from the `near` crate instead.

use std::sync::Arc;

use axum::{routing::get, Router};
use near::{
    api,
    db::ChromaStore,
    llm::OpenAiCompatClient,
    rag::{EngineConfig, HttpEmbeddingClient, QueryEngine},
    AppState, Config,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting N.E.A.R - Northeastern Engine for Answer Retrieval");

    // =================================================================
    // Load Configuration
    // =================================================================
    // Missing required values fail fast here, before anything binds.
    let config = Arc::new(Config::from_env()?);
    tracing::info!(
        default_mode = %config.retrieval.default_mode,
        topology = if config.is_unified() { "unified" } else { "sharded" },
        "configuration loaded"
    );

    // =================================================================
    // Build Collaborator Clients
    // =================================================================
    let embedder = Arc::new(HttpEmbeddingClient::new(
        &config.embedding.endpoint,
        config.embedding.api_key.clone(),
        &config.embedding.model_id,
    )?);

    let store = Arc::new(ChromaStore::new(
        &config.vector_store.endpoint,
        &config.vector_store.api_key,
        &config.vector_store.tenant,
        &config.vector_store.database,
    )?);

    let chat = Arc::new(OpenAiCompatClient::new(
        &config.llm.endpoint,
        &config.llm.api_key,
        &config.llm.model,
    )?);
    tracing::info!(model = %config.llm.model, "chat client initialized");

    // =================================================================
    // Build the Query Engine
    // =================================================================
    let engine = Arc::new(QueryEngine::new(
        EngineConfig::from_config(&config),
        embedder,
        store,
        chat,
    ));

    // Warm the shard cache on the sharded path so the first request does
    // not pay for collection listing.
    if !engine.is_unified() {
        match engine.refresh_shards().await {
            Ok(count) => tracing::info!(shard_count = count, "shard list warmed"),
            Err(err) => tracing::warn!(error = %err, "shard list warm-up failed"),
        }
    }

    let state = AppState {
        engine,
        config: Arc::clone(&config),
    };

    // =================================================================
    // Build OpenAPI Documentation
    // =================================================================
    #[derive(OpenApi)]
    #[openapi(
        paths(
            near::api::handlers::ask::ask,
            near::api::handlers::info::info,
            near::api::handlers::info::refresh_shards,
        ),
        components(schemas(
            near::types::AskRequest,
            near::types::AnswerEnvelope,
            near::types::Source,
            near::types::Timings,
            near::types::Mode,
            near::types::ErrorResponse,
        )),
        tags(
            (name = "ask", description = "Question answering"),
            (name = "info", description = "Runtime info and cache management"),
        ),
        info(
            title = "N.E.A.R - Northeastern Engine for Answer Retrieval API",
            version = "0.3.0",
            description = "Deadline-aware retrieval-augmented QA over Northeastern University web content"
        )
    )]
    struct ApiDoc;

    // =================================================================
    // Build Router
    // =================================================================
    let openapi = ApiDoc::openapi();
    let app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/api-docs/openapi.json",
            get(move || async move { axum::Json(openapi) }),
        )
        .nest("/api", api::routes::create_router())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // =================================================================
    // Start Server
    // =================================================================
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server running on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}
