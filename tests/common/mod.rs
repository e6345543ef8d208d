//! Scripted doubles for every external collaborator

#![allow(dead_code)]

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use riksrag::clients::Embedder;
use riksrag::clients::GenerationClient;
use riksrag::clients::ScoringClient;
use riksrag::clients::VectorHit;
use riksrag::clients::VectorSearchClient;
use riksrag::llm::ChatMessage;
use riksrag::llm::GenerationParams;
use riksrag::llm::StreamingResponse;
use riksrag::models::DocumentMetadata;
use riksrag::rag::Orchestrator;
use riksrag::rag::RetrievalOrchestrator;
use riksrag::AppConfig;
use riksrag::Result;
use riksrag::RiksRagError;

pub const SFS: &str = "sfs_lagtext";
pub const RIKSDAG: &str = "riksdag_documents";
pub const MYNDIGHET: &str = "myndighet_vagledning";

pub const QUESTION: &str = "Vad säger dataskyddslagen om personuppgifter i forskning?";

/// Text of a document that answers `QUESTION`
pub const RELEVANT_TEXT: &str =
    "Dataskyddslagen säger att personuppgifter får behandlas för forskning av allmänt intresse.";

pub const APPROVE: &str = r#"{"approved": true, "feedback": "", "repairable": true}"#;

pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.retrieval.default_k = 5;
    config.vector_store.collections = vec![SFS.into(), RIKSDAG.into(), MYNDIGHET.into()];
    config.vector_store.statute_collections = vec![SFS.into()];
    config.streaming.replay_chunk_chars = 8;
    config
}

pub fn hit(id: &str, text: &str, score: f32) -> VectorHit {
    VectorHit {
        doc_id: id.to_string(),
        text: text.to_string(),
        metadata: DocumentMetadata {
            title: Some(format!("Dokument {id}")),
            ..DocumentMetadata::default()
        },
        score,
    }
}

/// Five hits per collection with descending similarity starting at `top`
pub fn hits(prefix: &str, text: &str, top: f32) -> Vec<VectorHit> {
    (0..5)
        .map(|i| hit(&format!("{prefix}-{i}"), text, top - 0.02 * i as f32))
        .collect()
}

// ====== Embedder ======

pub struct FixedEmbedder {
    fail: bool,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(RiksRagError::EmbeddingError("embedding service down".into()));
        }
        Ok(vec![0.1, 0.2, 0.3])
    }
}

// ====== Vector store ======

#[derive(Clone)]
pub enum CollectionBehavior {
    Hits(Vec<VectorHit>),
    Fail,
    Slow(Duration, Vec<VectorHit>),
}

pub struct ScriptedVectorStore {
    collections: HashMap<String, CollectionBehavior>,
    pub queries: AtomicUsize,
    pub requested_k: Mutex<Vec<usize>>,
}

impl ScriptedVectorStore {
    pub fn new(collections: Vec<(&str, CollectionBehavior)>) -> Arc<Self> {
        Arc::new(Self {
            collections: collections
                .into_iter()
                .map(|(name, behavior)| (name.to_string(), behavior))
                .collect(),
            queries: AtomicUsize::new(0),
            requested_k: Mutex::new(Vec::new()),
        })
    }

    /// Relevant SFS documents ranked above commentary from the other collections
    pub fn relevant() -> Arc<Self> {
        Self::new(vec![
            (SFS, CollectionBehavior::Hits(hits("sfs", RELEVANT_TEXT, 0.92))),
            (RIKSDAG, CollectionBehavior::Hits(hits("rd", RELEVANT_TEXT, 0.80))),
            (MYNDIGHET, CollectionBehavior::Hits(hits("myn", RELEVANT_TEXT, 0.78))),
        ])
    }

    /// Mid-similarity documents about something else: escalates but never abstains
    pub fn off_topic() -> Arc<Self> {
        let text = "Bestämmelser om fiskevård i insjöar och vattendrag.";
        let flat = |prefix: &str| {
            (0..5)
                .map(|i| hit(&format!("{prefix}-{i}"), text, 0.5))
                .collect::<Vec<_>>()
        };
        Self::new(vec![
            (SFS, CollectionBehavior::Hits(flat("sfs"))),
            (RIKSDAG, CollectionBehavior::Hits(flat("rd"))),
            (MYNDIGHET, CollectionBehavior::Hits(flat("myn"))),
        ])
    }

    pub fn empty() -> Arc<Self> {
        Self::new(vec![
            (SFS, CollectionBehavior::Hits(Vec::new())),
            (RIKSDAG, CollectionBehavior::Hits(Vec::new())),
            (MYNDIGHET, CollectionBehavior::Hits(Vec::new())),
        ])
    }

    pub fn all_failing() -> Arc<Self> {
        Self::new(vec![
            (SFS, CollectionBehavior::Fail),
            (RIKSDAG, CollectionBehavior::Fail),
            (MYNDIGHET, CollectionBehavior::Fail),
        ])
    }
}

#[async_trait]
impl VectorSearchClient for ScriptedVectorStore {
    async fn query(&self, collection: &str, _embedding: &[f32], k: usize) -> Result<Vec<VectorHit>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        self.requested_k.lock().unwrap().push(k);
        match self.collections.get(collection) {
            Some(CollectionBehavior::Hits(hits)) => Ok(hits.iter().take(k).cloned().collect()),
            Some(CollectionBehavior::Slow(delay, hits)) => {
                tokio::time::sleep(*delay).await;
                Ok(hits.iter().take(k).cloned().collect())
            }
            Some(CollectionBehavior::Fail) | None => Err(RiksRagError::Retrieval(format!(
                "collection {collection} unavailable"
            ))),
        }
    }
}

// ====== Scoring ======

/// Grades a document relevant when its text contains a marker word
pub struct KeywordScoring {
    marker: String,
    pub grades: AtomicUsize,
}

impl KeywordScoring {
    pub fn new(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            marker: marker.to_lowercase(),
            grades: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ScoringClient for KeywordScoring {
    async fn grade(&self, text: &str, _question: &str) -> Result<bool> {
        self.grades.fetch_add(1, Ordering::SeqCst);
        Ok(text.to_lowercase().contains(&self.marker))
    }

    async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
        Ok(texts
            .iter()
            .map(|t| if t.to_lowercase().contains(&self.marker) { 0.9 } else { 0.1 })
            .collect())
    }
}

// ====== Generation ======

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromptKind {
    Answer,
    Critique,
    Variants,
    Transform,
    Decontextualize,
    Chat,
}

fn classify(messages: &[ChatMessage]) -> PromptKind {
    let first = messages.first().map(|m| m.content.as_str()).unwrap_or_default();
    if first.starts_with("Granska ett utkast") {
        PromptKind::Critique
    } else if first.starts_with("Skapa ") {
        PromptKind::Variants
    } else if first.starts_with("Sökningen efter relevanta dokument") {
        PromptKind::Transform
    } else if first.starts_with("Skriv om den sista frågan") {
        PromptKind::Decontextualize
    } else if first.starts_with("Du är en vänlig assistent") {
        PromptKind::Chat
    } else {
        PromptKind::Answer
    }
}

/// Replies routed by prompt kind. Each kind pops from its own queue and keeps
/// repeating the last reply once the queue runs dry.
pub struct ScriptedGeneration {
    replies: Mutex<HashMap<PromptKind, VecDeque<String>>>,
    last: Mutex<HashMap<PromptKind, String>>,
    calls: Mutex<HashMap<PromptKind, usize>>,
    pub answer_delay: Option<Duration>,
    pub prompts: Mutex<Vec<(PromptKind, Vec<ChatMessage>)>>,
}

impl ScriptedGeneration {
    pub fn new() -> Self {
        Self {
            replies: Mutex::new(HashMap::new()),
            last: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
            answer_delay: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn reply(self, kind: PromptKind, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .entry(kind)
            .or_default()
            .push_back(text.to_string());
        self
    }

    #[must_use]
    pub fn with_answer_delay(mut self, delay: Duration) -> Self {
        self.answer_delay = Some(delay);
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self, kind: PromptKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }

    fn next_reply(&self, kind: PromptKind) -> Result<String> {
        *self.calls.lock().unwrap().entry(kind).or_default() += 1;
        let popped = self
            .replies
            .lock()
            .unwrap()
            .get_mut(&kind)
            .and_then(VecDeque::pop_front);
        let mut last = self.last.lock().unwrap();
        match popped {
            Some(reply) => {
                last.insert(kind, reply.clone());
                Ok(reply)
            }
            None => last.get(&kind).cloned().ok_or_else(|| {
                RiksRagError::GenerationConnection(format!("no scripted reply for {kind:?}"))
            }),
        }
    }
}

#[async_trait]
impl GenerationClient for ScriptedGeneration {
    async fn complete(&self, messages: &[ChatMessage], _params: &GenerationParams) -> Result<String> {
        let kind = classify(messages);
        self.prompts.lock().unwrap().push((kind, messages.to_vec()));
        if kind == PromptKind::Answer {
            if let Some(delay) = self.answer_delay {
                tokio::time::sleep(delay).await;
            }
        }
        self.next_reply(kind)
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamingResponse> {
        let text = self.complete(messages, params).await?;
        let tokens: Vec<Result<String>> = text
            .split_inclusive(' ')
            .map(|t| Ok(t.to_string()))
            .collect();
        Ok(StreamingResponse::new(Box::pin(futures::stream::iter(tokens))))
    }
}

/// Structured evidence answer citing the given working-set positions
pub fn evidence_json(answer: &str, citations: &[&str]) -> String {
    serde_json::json!({
        "answer": answer,
        "citations": citations,
        "confidence": 0.9,
    })
    .to_string()
}

pub fn cited_answer() -> String {
    evidence_json(
        "Dataskyddslagen tillåter behandling av personuppgifter för forskning av allmänt intresse [1]. Samma regel gäller enligt vägledningen från myndigheten [2].",
        &["1", "2"],
    )
}

/// Generation double that answers `QUESTION` with citations and approves the draft
pub fn answering_generation() -> ScriptedGeneration {
    ScriptedGeneration::new()
        .reply(PromptKind::Answer, &cited_answer())
        .reply(PromptKind::Critique, APPROVE)
        .reply(PromptKind::Variants, "forskningsundantag personuppgifter\ndataskydd forskning")
        .reply(PromptKind::Transform, "behandling av personuppgifter forskningsändamål")
        .reply(PromptKind::Chat, "Hej! Vad vill du veta om svensk lag?")
}

pub fn orchestrator(
    config: AppConfig,
    store: Arc<ScriptedVectorStore>,
    scoring: Arc<KeywordScoring>,
    generation: Arc<ScriptedGeneration>,
) -> Arc<Orchestrator> {
    orchestrator_with_timeout(config, store, scoring, generation, Duration::from_secs(5))
}

pub fn orchestrator_with_timeout(
    config: AppConfig,
    store: Arc<ScriptedVectorStore>,
    scoring: Arc<KeywordScoring>,
    generation: Arc<ScriptedGeneration>,
    collection_timeout: Duration,
) -> Arc<Orchestrator> {
    let retrieval = RetrievalOrchestrator::new(
        &config,
        FixedEmbedder::new(),
        store,
        generation.clone(),
        None,
    )
    .with_collection_timeout(collection_timeout);
    Arc::new(Orchestrator::with_retrieval(
        config,
        Arc::new(retrieval),
        scoring,
        generation,
    ))
}
