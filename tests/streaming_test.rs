//! Streaming responses: event order, chat tokens, errors and cancellation

mod common;

use std::time::Duration;

use common::*;
use riksrag::models::RequestedMode;
use riksrag::rag::QueryRequest;
use riksrag::rag::StreamEvent;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("stream stalled")
    {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_metadata_precedes_tokens_and_done_closes() {
    let orch = orchestrator(
        test_config(),
        ScriptedVectorStore::relevant(),
        KeywordScoring::new("dataskyddslagen"),
        answering_generation().build(),
    );

    let rx = orch.stream_query(
        QueryRequest::new(QUESTION).with_mode(RequestedMode::Evidence),
        CancellationToken::new(),
    );
    let events = collect(rx).await;

    let StreamEvent::Metadata(metadata) = &events[0] else {
        panic!("first event must be metadata");
    };
    assert!(!metadata.saknas_underlag);
    assert_eq!(metadata.sources.len(), 2);
    assert_eq!(metadata.sources[0].collection, SFS);

    let StreamEvent::Done(answer) = events.last().unwrap() else {
        panic!("last event must be done");
    };
    let streamed: String = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Token(t) => Some(t.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(streamed, answer.answer);
    assert_eq!(metadata.request_id, answer.metadata.request_id);

    // Nothing but tokens between metadata and done
    assert!(events[1..events.len() - 1]
        .iter()
        .all(|e| matches!(e, StreamEvent::Token(_))));
}

#[tokio::test]
async fn test_refusal_is_streamed_with_abstain_metadata() {
    let orch = orchestrator(
        test_config(),
        ScriptedVectorStore::empty(),
        KeywordScoring::new("dataskyddslagen"),
        answering_generation().build(),
    );

    let events = collect(orch.stream_query(
        QueryRequest::new(QUESTION).with_mode(RequestedMode::Evidence),
        CancellationToken::new(),
    ))
    .await;

    let StreamEvent::Metadata(metadata) = &events[0] else {
        panic!("first event must be metadata");
    };
    assert!(metadata.saknas_underlag);
    assert!(metadata.sources.is_empty());
    assert!(matches!(events.last(), Some(StreamEvent::Done(a)) if a.saknas_underlag));
}

#[tokio::test]
async fn test_chat_tokens_are_forwarded() {
    let orch = orchestrator(
        test_config(),
        ScriptedVectorStore::relevant(),
        KeywordScoring::new("dataskyddslagen"),
        answering_generation().build(),
    );

    let events = collect(orch.stream_query(QueryRequest::new("Hej!"), CancellationToken::new())).await;

    assert!(matches!(events[0], StreamEvent::Metadata(_)));
    let tokens = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Token(_)))
        .count();
    assert!(tokens > 1);
    let Some(StreamEvent::Done(answer)) = events.last() else {
        panic!("last event must be done");
    };
    assert_eq!(answer.answer, "Hej! Vad vill du veta om svensk lag?");
}

#[tokio::test]
async fn test_retrieval_failure_becomes_error_event() {
    let orch = orchestrator(
        test_config(),
        ScriptedVectorStore::all_failing(),
        KeywordScoring::new("dataskyddslagen"),
        answering_generation().build(),
    );

    let events = collect(orch.stream_query(
        QueryRequest::new(QUESTION).with_mode(RequestedMode::Evidence),
        CancellationToken::new(),
    ))
    .await;

    assert_eq!(events.len(), 1);
    match &events[0] {
        StreamEvent::Error { code, .. } => assert_eq!(code, "retrieval_error"),
        other => panic!("expected error event, got {other:?}"),
    }
}

#[tokio::test]
async fn test_dropping_receiver_cancels_request() {
    let orch = orchestrator(
        test_config(),
        ScriptedVectorStore::relevant(),
        KeywordScoring::new("dataskyddslagen"),
        answering_generation()
            .with_answer_delay(Duration::from_secs(10))
            .build(),
    );

    let cancel = CancellationToken::new();
    let rx = orch.stream_query(
        QueryRequest::new(QUESTION).with_mode(RequestedMode::Evidence),
        cancel.clone(),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(rx);

    tokio::time::timeout(Duration::from_secs(2), cancel.cancelled())
        .await
        .expect("client disconnect should cancel the request");
}
