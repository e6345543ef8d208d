//! Shared data types for the retrieval and answering pipeline

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::rag::confidence::ConfidenceReport;
use crate::RiksRagError;

/// Document types that carry statutory text
const STATUTE_DOC_TYPES: &[&str] = &["sfs", "lag", "forordning", "förordning", "statute"];

/// Descriptive metadata attached to a retrieved document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub doc_type: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub sfs_number: Option<String>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// An immutable retrieved unit of text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    pub source_collection: String,
    pub metadata: DocumentMetadata,
}

impl Document {
    /// Whether this document is statutory text (SFS) rather than commentary
    pub fn is_statute(&self, statute_collections: &[String]) -> bool {
        if statute_collections.iter().any(|c| c == &self.source_collection) {
            return true;
        }
        if self.metadata.sfs_number.is_some() {
            return true;
        }
        self.metadata
            .doc_type
            .as_deref()
            .map(str::to_lowercase)
            .is_some_and(|t| STATUTE_DOC_TYPES.contains(&t.as_str()))
    }

    /// Human-readable label used in prompts and source listings
    pub fn label(&self) -> String {
        match (&self.metadata.title, &self.metadata.sfs_number) {
            (Some(title), Some(sfs)) => format!("{title} (SFS {sfs})"),
            (Some(title), None) => title.clone(),
            (None, Some(sfs)) => format!("SFS {sfs}"),
            (None, None) => self.id.clone(),
        }
    }
}

/// A document with its score and position in the list that produced it.
///
/// Documents are shared behind `Arc` so that the same passage reached through
/// several queries is never copied.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub document: Arc<Document>,
    /// Ordering score: raw similarity, fused RRF score or rerank score
    pub score: f32,
    /// Best absolute relevance seen for this document, in [0, 1]
    pub similarity: f32,
    pub rank: usize,
    /// Which sub-query or collection produced the result
    pub strategy_tag: String,
    /// Number of input lists the document appeared in after fusion
    pub sources_hit: usize,
}

impl ScoredResult {
    pub fn new(document: Arc<Document>, score: f32, rank: usize, tag: impl Into<String>) -> Self {
        Self {
            document,
            score,
            similarity: score.clamp(0.0, 1.0),
            rank,
            strategy_tag: tag.into(),
            sources_hit: 1,
        }
    }

    pub fn id(&self) -> &str {
        &self.document.id
    }
}

/// One ranked result list as produced by a single query against a single collection
#[derive(Debug, Clone, Default)]
pub struct RankedList {
    pub tag: String,
    pub results: Vec<ScoredResult>,
}

impl RankedList {
    pub fn new(tag: impl Into<String>, results: Vec<ScoredResult>) -> Self {
        Self {
            tag: tag.into(),
            results,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Retrieval strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// One query per collection, fused with RRF
    Parallel,
    /// Decontextualize against history, then Parallel
    Rewrite,
    /// Multi-query RAG-Fusion over generated variants
    Fusion,
    /// Escalation ladder Parallel -> larger k -> Fusion -> best effort
    #[default]
    Adaptive,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Rewrite => "rewrite",
            Self::Fusion => "fusion",
            Self::Adaptive => "adaptive",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = RiksRagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "rewrite" => Ok(Self::Rewrite),
            "fusion" | "rag-fusion" | "rag_fusion" => Ok(Self::Fusion),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(RiksRagError::Validation(format!(
                "Unknown retrieval strategy: {other}"
            ))),
        }
    }
}

/// Response mode requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Every factual claim must cite a retrieved source
    #[default]
    Evidence,
    /// Grounded but allowed to explain and summarize
    Assist,
    /// Conversational turn without retrieval
    Chat,
}

impl ResponseMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Evidence => "evidence",
            Self::Assist => "assist",
            Self::Chat => "chat",
        }
    }

    pub const fn uses_retrieval(self) -> bool {
        !matches!(self, Self::Chat)
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode as sent by callers; `Auto` lets the orchestrator decide
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestedMode {
    #[default]
    Auto,
    Evidence,
    Assist,
    Chat,
}

impl FromStr for RequestedMode {
    type Err = RiksRagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "auto" => Ok(Self::Auto),
            "evidence" => Ok(Self::Evidence),
            "assist" => Ok(Self::Assist),
            "chat" => Ok(Self::Chat),
            other => Err(RiksRagError::Validation(format!("Unknown mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One prior turn of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub role: Role,
    pub content: String,
}

impl HistoryTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ephemeral description of how one request will be searched
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub original_question: String,
    pub rewritten_question: Option<String>,
    pub strategy: Strategy,
    pub collections: Vec<String>,
    pub k: usize,
}

impl QueryPlan {
    /// The question actually sent to the vector store
    pub fn effective_question(&self) -> &str {
        self.rewritten_question
            .as_deref()
            .unwrap_or(&self.original_question)
    }
}

/// How well the final answer is supported
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EvidenceLevel {
    High,
    Medium,
    Low,
    None,
}

/// Source reference returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
    pub title: String,
    pub collection: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sfs_number: Option<String>,
    pub snippet: String,
}

impl SourceRef {
    pub fn from_result(result: &ScoredResult) -> Self {
        let doc = &result.document;
        let snippet: String = doc.text.chars().take(240).collect();
        Self {
            id: doc.id.clone(),
            title: doc.label(),
            collection: doc.source_collection.clone(),
            score: result.score,
            sfs_number: doc.metadata.sfs_number.clone(),
            snippet,
        }
    }
}

/// Diagnostic information attached to every answer
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswerMetadata {
    pub request_id: String,
    pub strategy: Option<Strategy>,
    pub escalation_step: Option<char>,
    pub confidence: Option<ConfidenceReport>,
    pub retrieval_loops: u32,
    pub critique_loops: u32,
    pub degraded_collections: Vec<String>,
    pub low_confidence: bool,
    pub fallback_reason: Option<String>,
    pub elapsed_ms: u64,
    pub generated_at: chrono::DateTime<chrono::Utc>,
}

/// Final answer returned by the orchestrator
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<SourceRef>,
    pub mode: ResponseMode,
    /// Explicit abstain signal ("evidence missing")
    pub saknas_underlag: bool,
    pub evidence_level: EvidenceLevel,
    pub metadata: AnswerMetadata,
}
