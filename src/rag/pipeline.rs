//! Request entry point: guardrails, mode resolution, the agentic flow and
//! answer assembly, for both one-shot and streaming responses

use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use uuid::Uuid;

use super::confidence::ConfidenceDecision;
use super::critic::citation_indices;
use super::flow::FlowController;
use super::flow::FlowState;
use super::guardrails::check_input;
use super::prompts::build_chat_messages;
use super::prompts::is_refusal;
use super::prompts::REFUSAL_TEXT;
use super::retrieval::RetrievalOrchestrator;
use crate::clients::EmbeddingClient;
use crate::clients::Embedder;
use crate::clients::GenerationClient;
use crate::clients::HttpVectorSearchClient;
use crate::clients::LlmScoringClient;
use crate::clients::OpenAiCompatibleClient;
use crate::clients::ScoringClient;
use crate::clients::VectorSearchClient;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::errors::RiksRagError;
use crate::llm::streaming::chunk_text;
use crate::llm::GenerationParams;
use crate::models::Answer;
use crate::models::AnswerMetadata;
use crate::models::EvidenceLevel;
use crate::models::HistoryTurn;
use crate::models::RequestedMode;
use crate::models::ResponseMode;
use crate::models::ScoredResult;
use crate::models::SourceRef;
use crate::models::Strategy;

/// Upper bound on the per-request result count
pub const MAX_K: usize = 50;

/// Buffered events per streaming request
const STREAM_BUFFER: usize = 64;

const SMALL_TALK: &[&str] = &[
    "hej", "hejsan", "hallå", "tjena", "tjenare", "god morgon", "god dag", "god kväll", "tack",
    "tack så mycket", "tusen tack", "vem är du", "vad kan du", "vad heter du", "hur mår du",
    "hej då", "hi", "hello", "hey", "thanks", "thank you",
];

const LEGAL_TERMS: &[&str] = &[
    "lag", "förordning", "sfs", "§", "paragraf", "kap", "gdpr", "regel", "regler", "rätt",
    "myndighet", "beslut", "dom", "prop", "sou", "tillstånd", "skatt", "avtal", "straff",
];

/// External collaborators the orchestrator is built from
pub struct Services {
    pub embedder: Arc<dyn Embedder>,
    pub vector_store: Arc<dyn VectorSearchClient>,
    pub scoring: Arc<dyn ScoringClient>,
    pub generation: Arc<dyn GenerationClient>,
    /// Cross-encoder used after fusion; `None` disables reranking
    pub reranker: Option<Arc<dyn ScoringClient>>,
}

impl Services {
    /// HTTP clients for every boundary, as configured
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let generation: Arc<dyn GenerationClient> =
            Arc::new(OpenAiCompatibleClient::new(&config.llm)?);
        let scoring: Arc<dyn ScoringClient> =
            Arc::new(LlmScoringClient::new(generation.clone(), config)?);
        let reranker = config.reranker.enabled.then(|| scoring.clone());

        Ok(Self {
            embedder: Arc::new(EmbeddingClient::from_config(&config.embeddings)?),
            vector_store: Arc::new(HttpVectorSearchClient::from_config(&config.vector_store)?),
            scoring,
            generation,
            reranker,
        })
    }
}

/// One question as received from a caller
#[derive(Debug, Clone, Default)]
pub struct QueryRequest {
    pub question: String,
    pub mode: RequestedMode,
    pub history: Vec<HistoryTurn>,
    pub strategy: Option<Strategy>,
    pub k: Option<usize>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_mode(mut self, mode: RequestedMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.history = history;
        self
    }
}

/// Sent once per stream, before the first token
#[derive(Debug, Clone, Serialize)]
pub struct StreamMetadata {
    pub request_id: String,
    pub mode: ResponseMode,
    pub strategy: Option<Strategy>,
    pub sources: Vec<SourceRef>,
    pub evidence_level: EvidenceLevel,
    pub saknas_underlag: bool,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Metadata(StreamMetadata),
    Token(String),
    Done(Box<Answer>),
    Error { code: String, message: String },
}

/// Pick the response mode. An explicit mode always wins; `Auto` sends
/// greetings and small talk without legal terms to Chat and everything else
/// to Evidence.
pub fn resolve_mode(requested: RequestedMode, question: &str) -> ResponseMode {
    match requested {
        RequestedMode::Evidence => ResponseMode::Evidence,
        RequestedMode::Assist => ResponseMode::Assist,
        RequestedMode::Chat => ResponseMode::Chat,
        RequestedMode::Auto if is_small_talk(question) => ResponseMode::Chat,
        RequestedMode::Auto => ResponseMode::Evidence,
    }
}

fn is_small_talk(question: &str) -> bool {
    let lowered = question.trim().to_lowercase();
    if lowered.chars().count() > 60 {
        return false;
    }
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric() && c != '§')
        .filter(|w| !w.is_empty())
        .collect();
    if words
        .iter()
        .any(|w| LEGAL_TERMS.iter().any(|t| w.starts_with(t)))
    {
        return false;
    }
    let normalized = words.join(" ");
    SMALL_TALK
        .iter()
        .any(|g| normalized == *g || normalized.starts_with(&format!("{g} ")))
}

pub struct Orchestrator {
    config: Arc<AppConfig>,
    flow: FlowController,
    generation: Arc<dyn GenerationClient>,
}

impl Orchestrator {
    pub fn new(config: AppConfig, services: Services) -> Self {
        let retrieval = Arc::new(RetrievalOrchestrator::new(
            &config,
            services.embedder,
            services.vector_store,
            services.generation.clone(),
            services.reranker,
        ));
        Self::with_retrieval(config, retrieval, services.scoring, services.generation)
    }

    /// Build around an existing retrieval orchestrator
    pub fn with_retrieval(
        config: AppConfig,
        retrieval: Arc<RetrievalOrchestrator>,
        scoring: Arc<dyn ScoringClient>,
        generation: Arc<dyn GenerationClient>,
    ) -> Self {
        let flow = FlowController::new(&config, retrieval, scoring, generation.clone());
        Self {
            config: Arc::new(config),
            flow,
            generation,
        }
    }

    pub fn from_config(config: AppConfig) -> Result<Self> {
        let services = Services::from_config(&config)?;
        Ok(Self::new(config, services))
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Answer a question end to end
    pub async fn process_query(&self, request: QueryRequest) -> Result<Answer> {
        self.process_query_with_cancel(request, &CancellationToken::new())
            .await
    }

    pub async fn process_query_with_cancel(
        &self,
        request: QueryRequest,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        check_input(&request.question, self.config.flow.max_question_chars)?;
        let mode = resolve_mode(request.mode, &request.question);
        info!(request_id = %request_id, mode = %mode, "Processing query");

        if mode == ResponseMode::Chat {
            let messages = build_chat_messages(&request.question, &request.history);
            let params = self.chat_params();
            let text = tokio::select! {
                () = cancel.cancelled() => return Err(RiksRagError::Cancelled),
                text = self.generation.complete(&messages, &params) => text?,
            };
            return Ok(chat_answer(text, request_id, started));
        }

        self.run_flow(request, mode, request_id, started, cancel)
            .await
    }

    /// Start answering in the background and return the event stream.
    ///
    /// Dropping the receiver cancels `cancel`, which aborts in-flight work.
    /// Drafts are generated whole; only the approved answer is replayed as
    /// tokens.
    pub fn stream_query(
        self: &Arc<Self>,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let this = Arc::clone(self);

        tokio::spawn(async move {
            tokio::select! {
                () = tx.closed() => {
                    debug!("Stream receiver dropped, cancelling request");
                    cancel.cancel();
                }
                () = this.drive_stream(request, &tx, &cancel) => {}
            }
        });
        rx
    }

    async fn drive_stream(
        &self,
        request: QueryRequest,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = self.stream_inner(request, tx, cancel).await {
            debug!("Stream ended with error: {}", e);
            let _ = tx
                .send(StreamEvent::Error {
                    code: e.code().to_string(),
                    message: e.public_message(),
                })
                .await;
        }
    }

    async fn stream_inner(
        &self,
        request: QueryRequest,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        let request_id = Uuid::new_v4().to_string();
        check_input(&request.question, self.config.flow.max_question_chars)?;
        let mode = resolve_mode(request.mode, &request.question);
        info!(request_id = %request_id, mode = %mode, "Streaming query");

        if mode == ResponseMode::Chat {
            send(
                tx,
                StreamEvent::Metadata(StreamMetadata {
                    request_id: request_id.clone(),
                    mode,
                    strategy: None,
                    sources: Vec::new(),
                    evidence_level: EvidenceLevel::None,
                    saknas_underlag: false,
                }),
            )
            .await?;

            let messages = build_chat_messages(&request.question, &request.history);
            let mut tokens = self
                .generation
                .complete_stream(&messages, &self.chat_params())
                .await?
                .into_stream();
            let mut text = String::new();
            loop {
                let next = tokio::select! {
                    () = cancel.cancelled() => return Err(RiksRagError::Cancelled),
                    next = tokens.next() => next,
                };
                match next {
                    Some(Ok(token)) => {
                        text.push_str(&token);
                        send(tx, StreamEvent::Token(token)).await?;
                    }
                    Some(Err(e)) => return Err(e),
                    None => break,
                }
            }
            let answer = chat_answer(text, request_id, started);
            return send(tx, StreamEvent::Done(Box::new(answer))).await;
        }

        let answer = self
            .run_flow(request, mode, request_id, started, cancel)
            .await?;
        send(
            tx,
            StreamEvent::Metadata(StreamMetadata {
                request_id: answer.metadata.request_id.clone(),
                mode: answer.mode,
                strategy: answer.metadata.strategy,
                sources: answer.sources.clone(),
                evidence_level: answer.evidence_level,
                saknas_underlag: answer.saknas_underlag,
            }),
        )
        .await?;

        for chunk in chunk_text(&answer.answer, self.config.streaming.replay_chunk_chars) {
            if cancel.is_cancelled() {
                return Err(RiksRagError::Cancelled);
            }
            send(tx, StreamEvent::Token(chunk)).await?;
        }
        send(tx, StreamEvent::Done(Box::new(answer))).await
    }

    async fn run_flow(
        &self,
        request: QueryRequest,
        mode: ResponseMode,
        request_id: String,
        started: Instant,
        cancel: &CancellationToken,
    ) -> Result<Answer> {
        let strategy = request
            .strategy
            .unwrap_or(self.config.retrieval.default_strategy);
        let k = request
            .k
            .unwrap_or(self.config.retrieval.default_k)
            .clamp(1, MAX_K);

        let state = FlowState::new(request_id, request.question, mode, strategy, k)
            .with_history(request.history);

        let state = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(RiksRagError::Cancelled),
            state = self.flow.run(state, cancel) => state?,
        };

        let answer = build_answer(&state, started);
        info!(
            request_id = %answer.metadata.request_id,
            saknas_underlag = answer.saknas_underlag,
            evidence_level = ?answer.evidence_level,
            sources = answer.sources.len(),
            "Query completed in {}ms",
            answer.metadata.elapsed_ms
        );
        Ok(answer)
    }

    fn chat_params(&self) -> GenerationParams {
        let chat = self.config.modes.chat;
        GenerationParams::new(chat.temperature, chat.max_tokens)
    }
}

fn build_answer(state: &FlowState, started: Instant) -> Answer {
    let sources: Vec<SourceRef> = match state.mode {
        ResponseMode::Evidence => cited_documents(state),
        _ => state.documents.iter().collect(),
    }
    .into_iter()
    .map(SourceRef::from_result)
    .collect();
    // An evidence answer that resolves to no source is not an answer
    let answered = state.is_approved()
        && !is_refusal(&state.generation)
        && !(state.mode == ResponseMode::Evidence && sources.is_empty());
    let last_metrics = state.retrieval_metrics.last();

    let metadata = AnswerMetadata {
        request_id: state.request_id.clone(),
        strategy: Some(state.strategy),
        escalation_step: last_metrics.and_then(|m| m.final_step),
        confidence: state.confidence.clone(),
        retrieval_loops: state.retrieval_loop_count,
        critique_loops: state.critique_loop_count,
        degraded_collections: state.degraded_collections.clone(),
        low_confidence: state.low_confidence,
        fallback_reason: state.fallback_reason().map(ToString::to_string),
        elapsed_ms: started.elapsed().as_millis() as u64,
        generated_at: chrono::Utc::now(),
    };

    if !answered {
        return Answer {
            answer: REFUSAL_TEXT.to_string(),
            sources: Vec::new(),
            mode: state.mode,
            saknas_underlag: true,
            evidence_level: EvidenceLevel::None,
            metadata,
        };
    }

    let accepted = state
        .confidence
        .as_ref()
        .is_some_and(|c| c.decision == ConfidenceDecision::Accept);
    let evidence_level = if state.low_confidence {
        EvidenceLevel::Low
    } else if accepted && sources.len() >= 2 {
        EvidenceLevel::High
    } else {
        EvidenceLevel::Medium
    };

    Answer {
        answer: state.generation.clone(),
        sources,
        mode: state.mode,
        saknas_underlag: false,
        evidence_level,
        metadata,
    }
}

/// Working-set documents referenced by `[n]` markers or structured
/// citations, in order of first reference
fn cited_documents(state: &FlowState) -> Vec<&ScoredResult> {
    let mut indices: Vec<usize> = citation_indices(&state.generation);
    for citation in &state.citations {
        let trimmed = citation.trim().trim_matches(['[', ']']);
        if let Ok(n) = trimmed.parse::<usize>() {
            indices.push(n);
        } else if let Some(pos) = state.documents.iter().position(|d| d.id() == trimmed) {
            indices.push(pos + 1);
        }
    }

    let mut cited: Vec<&ScoredResult> = Vec::new();
    for n in indices {
        if let Some(doc) = n.checked_sub(1).and_then(|i| state.documents.get(i)) {
            if !cited.iter().any(|c| c.id() == doc.id()) {
                cited.push(doc);
            }
        }
    }
    cited
}

fn chat_answer(text: String, request_id: String, started: Instant) -> Answer {
    Answer {
        answer: text,
        sources: Vec::new(),
        mode: ResponseMode::Chat,
        saknas_underlag: false,
        evidence_level: EvidenceLevel::None,
        metadata: AnswerMetadata {
            request_id,
            elapsed_ms: started.elapsed().as_millis() as u64,
            generated_at: chrono::Utc::now(),
            ..AnswerMetadata::default()
        },
    }
}

async fn send(tx: &mpsc::Sender<StreamEvent>, event: StreamEvent) -> Result<()> {
    tx.send(event).await.map_err(|_| RiksRagError::Cancelled)
}
