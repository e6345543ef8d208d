//! HTTP surface: JSON and SSE endpoints served from an in-process router

mod common;

use axum::body::Body;
use axum::http::Request;
use axum::http::StatusCode;
use axum::Router;
use common::*;
use riksrag::api::build_router;
use riksrag::api::handlers::AppState;
use riksrag::llm::is_keep_alive_frame;
use serde_json::json;
use serde_json::Value;
use tower::ServiceExt;

fn router(store: std::sync::Arc<ScriptedVectorStore>) -> Router {
    let orch = orchestrator(
        test_config(),
        store,
        KeywordScoring::new("dataskyddslagen"),
        answering_generation().build(),
    );
    build_router(AppState::new(orch), false)
}

fn post(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_health() {
    let response = router(ScriptedVectorStore::relevant())
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "healthy");
    assert_eq!(body["data"]["collections"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_query_returns_answer() {
    let response = router(ScriptedVectorStore::relevant())
        .oneshot(post(
            "/agent/query",
            &json!({"question": QUESTION, "mode": "evidence"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["saknas_underlag"], false);
    assert_eq!(body["mode"], "evidence");
    assert_eq!(body["evidence_level"], "HIGH");
    assert_eq!(body["sources"][0]["collection"], SFS);
}

#[tokio::test]
async fn test_strategy_header_overrides_body() {
    let request = Request::builder()
        .method("POST")
        .uri("/agent/query")
        .header("content-type", "application/json")
        .header("X-Retrieval-Strategy", "parallel")
        .body(Body::from(
            json!({"question": QUESTION, "strategy": "fusion"}).to_string(),
        ))
        .unwrap();

    let response = router(ScriptedVectorStore::relevant())
        .oneshot(request)
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["metadata"]["strategy"], "parallel");
}

#[tokio::test]
async fn test_guardrail_violation_is_bad_request() {
    let response = router(ScriptedVectorStore::relevant())
        .oneshot(post(
            "/agent/query",
            &json!({"question": "Får min chef spara 19850412-1234 i ett register?"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let text = body_text(response).await;
    let body: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(body["code"], "guardrail_violation");
    assert!(!text.contains("1234"));
}

#[tokio::test]
async fn test_invalid_mode_is_bad_request() {
    let response = router(ScriptedVectorStore::relevant())
        .oneshot(post(
            "/agent/query",
            &json!({"question": QUESTION, "mode": "juridik"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["code"], "validation_error");
}

#[tokio::test]
async fn test_unreachable_collections_map_to_503() {
    let response = router(ScriptedVectorStore::all_failing())
        .oneshot(post("/agent/query", &json!({"question": QUESTION})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["code"], "retrieval_error");
}

#[tokio::test]
async fn test_stream_emits_sse_events_in_order() {
    let response = router(ScriptedVectorStore::relevant())
        .oneshot(post(
            "/agent/query/stream",
            &json!({"question": QUESTION, "mode": "evidence"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    assert!(content_type.starts_with("text/event-stream"));

    let text = body_text(response).await;
    let metadata = text.find("event: metadata").expect("metadata event");
    let token = text.find("event: token").expect("token event");
    let done = text.find("event: done").expect("done event");
    assert!(metadata < token && token < done);
    assert!(!text.contains("event: error"));
}

#[tokio::test]
async fn test_stream_keep_alive_frames_are_skippable() {
    let orch = orchestrator(
        test_config(),
        ScriptedVectorStore::relevant(),
        KeywordScoring::new("dataskyddslagen"),
        answering_generation()
            .with_answer_delay(std::time::Duration::from_millis(600))
            .build(),
    );
    let mut state = AppState::new(orch);
    state.keep_alive = std::time::Duration::from_millis(100);

    let response = build_router(state, false)
        .oneshot(post(
            "/agent/query/stream",
            &json!({"question": QUESTION, "mode": "evidence"}),
        ))
        .await
        .unwrap();
    let text = body_text(response).await;

    let keep_alives = text
        .lines()
        .filter(|line| line.starts_with(':'))
        .count();
    assert!(keep_alives > 0, "no keep-alive frames in {text}");
    assert!(text.contains("keep-alive"));

    // A consumer that drops keep-alive frames can parse every payload
    let payloads: Vec<Value> = text
        .lines()
        .filter(|line| !is_keep_alive_frame(line))
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).expect("data payload is JSON"))
        .collect();
    assert!(payloads.len() >= 3);
    assert_eq!(payloads.last().unwrap()["saknas_underlag"], false);
}
