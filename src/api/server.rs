//! HTTP server implementation

use std::sync::Arc;

use axum::routing::get;
use axum::Router;
use tower_http::cors::Any;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api::handlers;
use crate::api::handlers::AppState;
use crate::api::routes;
use crate::config::AppConfig;
use crate::rag::Orchestrator;
use crate::Result;

/// Start the API server
pub async fn serve_api(
    config: &AppConfig,
    host: String,
    port: u16,
    enable_cors: bool,
) -> Result<()> {
    info!("Starting RiksRAG API server...");

    let orchestrator = Arc::new(Orchestrator::from_config(config.clone())?);
    info!(
        "Collections: {} (priority: {})",
        config.vector_store.collections.join(", "),
        config.priority_collection().unwrap_or("-")
    );
    info!("Default strategy: {}", config.retrieval.default_strategy);

    let app = build_router(AppState::new(orchestrator), enable_cors);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("API server listening on http://{}", addr);
    info!("");
    info!("Available endpoints:");
    info!("  GET  /health              - Health check");
    info!("  POST /agent/query         - Answer a question");
    info!("  POST /agent/query/stream  - Answer a question as server-sent events");
    info!("");

    axum::serve(listener, app).await?;

    Ok(())
}

/// Assemble the full router with middleware layers
pub fn build_router(state: AppState, enable_cors: bool) -> Router {
    let mut app = Router::new()
        .route("/health", get(handlers::health))
        .with_state(state.clone())
        .nest("/agent", routes::agent_routes(state))
        .layer(TraceLayer::new_for_http());

    if enable_cors {
        info!("CORS enabled");
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app
}
