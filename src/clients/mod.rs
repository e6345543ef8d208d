//! Boundaries to external collaborators: embedding model, vector store,
//! relevance scoring and text generation.
//!
//! Every collaborator is a trait object injected into the components that need
//! it, so tests can substitute scripted doubles.

pub mod embeddings;
pub mod generation;
pub mod retry;
pub mod scoring;
pub mod vector_store;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

pub use embeddings::EmbeddingClient;
pub use embeddings::EmbeddingProvider;
pub use generation::OpenAiCompatibleClient;
pub use retry::BackoffPolicy;
pub use scoring::LlmScoringClient;
pub use vector_store::HttpVectorSearchClient;

use crate::errors::Result;
use crate::llm::ChatMessage;
use crate::llm::GenerationParams;
use crate::llm::StreamingResponse;
use crate::models::DocumentMetadata;

/// One nearest-neighbour hit returned by the vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    pub doc_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
    pub score: f32,
}

/// Turns text into a query embedding
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Approximate nearest-neighbour index keyed by collection name
#[async_trait]
pub trait VectorSearchClient: Send + Sync {
    async fn query(&self, collection: &str, embedding: &[f32], k: usize) -> Result<Vec<VectorHit>>;
}

/// Cheap relevance classification and precise cross-encoder reranking
#[async_trait]
pub trait ScoringClient: Send + Sync {
    async fn grade(&self, text: &str, question: &str) -> Result<bool>;

    /// One score per input text, in input order
    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;
}

/// Chat-completion endpoint
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn complete(&self, messages: &[ChatMessage], params: &GenerationParams)
        -> Result<String>;

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamingResponse>;
}
