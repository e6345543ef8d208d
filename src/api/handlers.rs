/// API request handlers
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::Event;
use axum::response::sse::KeepAlive;
use axum::response::sse::Sse;
use axum::Json;
use futures::Stream;
use futures::StreamExt;
use serde::Serialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing::warn;

use crate::api::types::AgentQueryRequest;
use crate::api::types::ApiError;
use crate::api::types::ApiResponse;
use crate::api::types::HealthResponse;
use crate::models::Answer;
use crate::rag::guardrails::check_input;
use crate::rag::Orchestrator;
use crate::rag::QueryRequest;
use crate::rag::StreamEvent;

/// Header that overrides the configured retrieval strategy
pub const STRATEGY_HEADER: &str = "x-retrieval-strategy";

/// Comment text of SSE keep-alive frames
pub const KEEP_ALIVE_TEXT: &str = "keep-alive";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub keep_alive: Duration,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        let keep_alive = Duration::from_secs(orchestrator.config().streaming.keep_alive_secs.max(1));
        Self {
            orchestrator,
            keep_alive,
        }
    }

    fn parse_request(
        &self,
        headers: &HeaderMap,
        body: AgentQueryRequest,
    ) -> Result<QueryRequest, ApiError> {
        let strategy = headers
            .get(STRATEGY_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        let request = body.into_query(strategy)?;
        check_input(
            &request.question,
            self.orchestrator.config().flow.max_question_chars,
        )?;
        Ok(request)
    }
}

/// Health check handler
pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    let config = state.orchestrator.config();
    Json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        collections: config.vector_store.collections.clone(),
        model: config.llm_model().to_string(),
    }))
}

/// POST /agent/query
pub async fn query(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AgentQueryRequest>,
) -> Result<Json<Answer>, ApiError> {
    let request = state.parse_request(&headers, body)?;
    info!("POST /agent/query (mode {:?})", request.mode);

    let answer = state.orchestrator.process_query(request).await.map_err(|e| {
        warn!("Query failed: {}", e);
        ApiError(e)
    })?;
    Ok(Json(answer))
}

/// POST /agent/query/stream
///
/// Events: `metadata` once, `token` per chunk, then `done` with the full
/// answer or `error`. Keep-alive comment frames are interleaved while the
/// pipeline works.
pub async fn query_stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<AgentQueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let request = state.parse_request(&headers, body)?;
    info!("POST /agent/query/stream (mode {:?})", request.mode);

    let cancel = CancellationToken::new();
    // Cancels the pipeline as soon as the client goes away and axum drops the stream
    let guard = cancel.clone().drop_guard();
    let events = state.orchestrator.stream_query(request, cancel);

    let stream = ReceiverStream::new(events).map(move |event| {
        let _guard = &guard;
        Ok(sse_event(event))
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.keep_alive)
            .text(KEEP_ALIVE_TEXT),
    ))
}

#[derive(Serialize)]
struct TokenPayload<'a> {
    token: &'a str,
}

#[derive(Serialize)]
struct ErrorPayload<'a> {
    code: &'a str,
    message: &'a str,
}

/// Render one pipeline event as an SSE frame with a JSON payload
pub fn sse_event(event: StreamEvent) -> Event {
    let rendered = match &event {
        StreamEvent::Metadata(metadata) => Event::default().event("metadata").json_data(metadata),
        StreamEvent::Token(token) => Event::default()
            .event("token")
            .json_data(TokenPayload { token }),
        StreamEvent::Done(answer) => Event::default().event("done").json_data(answer),
        StreamEvent::Error { code, message } => Event::default()
            .event("error")
            .json_data(ErrorPayload { code, message }),
    };
    rendered.unwrap_or_else(|e| {
        warn!("Failed to serialize stream event: {}", e);
        Event::default()
            .event("error")
            .data(r#"{"code":"internal_error","message":"Internal server error"}"#)
    })
}
