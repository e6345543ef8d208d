//! API route definitions

use axum::routing::post;
use axum::Router;
use tower_http::compression::CompressionLayer;

use super::handlers::AppState;
use super::handlers::{
    self,
};

/// Agent endpoints, mounted under `/agent`
///
/// The SSE route stays uncompressed so frames reach the client as they are
/// written.
pub fn agent_routes(state: AppState) -> Router {
    let one_shot = Router::new()
        .route("/query", post(handlers::query))
        .layer(CompressionLayer::new());

    Router::new()
        .merge(one_shot)
        .route("/query/stream", post(handlers::query_stream))
        .with_state(state)
}
