//! Adaptive retrieval-augmented answering
//!
//! This module provides the question-answering pipeline over Swedish legal and
//! government documents:
//! - Multi-collection retrieval fused with Reciprocal Rank Fusion
//! - Confidence-driven escalation (Parallel, larger k, RAG-Fusion)
//! - Per-document relevance grading and bounded query transformation
//! - Draft critique with citation checks and a canonical refusal fallback
//!
//! # Examples
//!
//! ```rust,no_run
//! use riksrag::config::AppConfig;
//! use riksrag::rag::Orchestrator;
//! use riksrag::rag::QueryRequest;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AppConfig::load()?;
//!     let orchestrator = Orchestrator::from_config(config)?;
//!
//!     let answer = orchestrator
//!         .process_query(QueryRequest::new("Vad säger dataskyddslagen om forskning?"))
//!         .await?;
//!     println!("Answer: {}", answer.answer);
//!     println!("Sources: {}", answer.sources.len());
//!
//!     Ok(())
//! }
//! ```

pub mod confidence;
pub mod context;
pub mod critic;
pub mod flow;
pub mod grader;
pub mod guardrails;
pub mod merger;
pub mod pipeline;
pub mod prompts;
pub mod query_transform;
pub mod retrieval;

pub use confidence::ConfidenceDecision;
pub use confidence::ConfidenceEvaluator;
pub use confidence::ConfidenceReport;
pub use context::ContextAssembler;
pub use critic::Critic;
pub use critic::CritiqueVerdict;
pub use flow::FallbackReason;
pub use flow::FlowController;
pub use flow::FlowNode;
pub use flow::FlowOutcome;
pub use flow::FlowState;
pub use grader::Grade;
pub use grader::Grader;
pub use merger::Merger;
pub use pipeline::resolve_mode;
pub use pipeline::Orchestrator;
pub use pipeline::QueryRequest;
pub use pipeline::Services;
pub use pipeline::StreamEvent;
pub use pipeline::StreamMetadata;
pub use prompts::is_refusal;
pub use prompts::REFUSAL_TEXT;
pub use query_transform::QueryTransformer;
pub use retrieval::RetrievalMetrics;
pub use retrieval::RetrievalOrchestrator;
pub use retrieval::SearchOutcome;
