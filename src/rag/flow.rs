//! Bounded agentic flow: retrieve, grade, generate, critique, with query
//! transformation and fallback as the only ways out of a failing loop.
//!
//! ```text
//! retrieve -> grade -> generate -> critique -> END
//!               |          ^           |
//!               v          +-- reject -+ (critique_loop_count < max)
//!        transform_query                |
//!               |                       v
//!               +-> retrieve         fallback
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::confidence::ConfidenceReport;
use super::context::ContextAssembler;
use super::critic::Critic;
use super::critic::CritiqueVerdict;
use super::grader::Grade;
use super::grader::Grader;
use super::prompts::build_answer_messages;
use super::prompts::REFUSAL_TEXT;
use super::retrieval::RetrievalMetrics;
use super::retrieval::RetrievalOrchestrator;
use crate::clients::GenerationClient;
use crate::clients::ScoringClient;
use crate::config::AppConfig;
use crate::config::ModesConfig;
use crate::config::MAX_LOOP_BOUND;
use crate::errors::Result;
use crate::errors::RiksRagError;
use crate::llm::complete_structured;
use crate::llm::GenerationParams;
use crate::llm::StructuredAnswer;
use crate::models::HistoryTurn;
use crate::models::ResponseMode;
use crate::models::ScoredResult;
use crate::models::Strategy;

/// Safety net on node transitions; the loop bounds end every run far sooner
pub const MAX_STEPS: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowNode {
    Retrieve,
    Grade,
    Generate,
    Critique,
    TransformQuery,
    Fallback,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Retrieval confidence was below the abstain threshold
    Abstain,
    /// Every retrieval round graded empty
    RetrievalExhausted,
    /// The critic kept rejecting drafts
    CritiqueExhausted,
    Unrepairable(String),
    /// The model never produced valid structured output
    StructuredOutput,
    StepLimit,
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Abstain => f.write_str("abstain"),
            Self::RetrievalExhausted => f.write_str("retrieval_exhausted"),
            Self::CritiqueExhausted => f.write_str("critique_exhausted"),
            Self::Unrepairable(reason) => write!(f, "unrepairable: {reason}"),
            Self::StructuredOutput => f.write_str("structured_output"),
            Self::StepLimit => f.write_str("step_limit"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    Approved,
    Fallback(FallbackReason),
}

/// Mutable state of one request, owned by a single `run`
#[derive(Debug, Clone)]
pub struct FlowState {
    pub request_id: String,
    pub question: String,
    pub mode: ResponseMode,
    pub history: Vec<HistoryTurn>,
    pub strategy: Strategy,
    pub k: usize,
    /// Query sent to retrieval; replaced by transform_query
    pub search_query: String,
    /// Working set: graded documents the draft is generated from
    pub documents: Vec<ScoredResult>,
    pub generation: String,
    /// Citations reported by structured generation
    pub citations: Vec<String>,
    pub web_search_needed: bool,
    pub retrieval_loop_count: u32,
    pub critique_loop_count: u32,
    pub drafts_generated: u32,
    pub constitutional_feedback: Option<String>,
    pub confidence: Option<ConfidenceReport>,
    pub retrieval_metrics: Vec<RetrievalMetrics>,
    pub degraded_collections: Vec<String>,
    pub low_confidence: bool,
    pub grading_errors: usize,
    pub grade_cache: HashMap<String, Grade>,
    pub trace: Vec<FlowNode>,
    pub outcome: Option<FlowOutcome>,
    pending_fallback: Option<FallbackReason>,
}

impl FlowState {
    pub fn new(
        request_id: impl Into<String>,
        question: impl Into<String>,
        mode: ResponseMode,
        strategy: Strategy,
        k: usize,
    ) -> Self {
        let question = question.into();
        Self {
            request_id: request_id.into(),
            search_query: question.clone(),
            question,
            mode,
            history: Vec::new(),
            strategy,
            k,
            documents: Vec::new(),
            generation: String::new(),
            citations: Vec::new(),
            web_search_needed: false,
            retrieval_loop_count: 0,
            critique_loop_count: 0,
            drafts_generated: 0,
            constitutional_feedback: None,
            confidence: None,
            retrieval_metrics: Vec::new(),
            degraded_collections: Vec::new(),
            low_confidence: false,
            grading_errors: 0,
            grade_cache: HashMap::new(),
            trace: Vec::new(),
            outcome: None,
            pending_fallback: None,
        }
    }

    #[must_use]
    pub fn with_history(mut self, history: Vec<HistoryTurn>) -> Self {
        self.history = history;
        self
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == Some(FlowOutcome::Approved)
    }

    pub fn fallback_reason(&self) -> Option<&FallbackReason> {
        match &self.outcome {
            Some(FlowOutcome::Fallback(reason)) => Some(reason),
            _ => None,
        }
    }

    fn route_to_fallback(&mut self, reason: FallbackReason) -> FlowNode {
        self.pending_fallback = Some(reason);
        FlowNode::Fallback
    }
}

pub struct FlowController {
    retrieval: Arc<RetrievalOrchestrator>,
    grader: Grader,
    critic: Critic,
    generation: Arc<dyn GenerationClient>,
    assembler: ContextAssembler,
    modes: ModesConfig,
    max_retrieval_loops: u32,
    max_critique_loops: u32,
}

impl FlowController {
    pub fn new(
        config: &AppConfig,
        retrieval: Arc<RetrievalOrchestrator>,
        scoring: Arc<dyn ScoringClient>,
        generation: Arc<dyn GenerationClient>,
    ) -> Self {
        Self {
            retrieval,
            grader: Grader::new(scoring, &config.grading),
            critic: Critic::new(
                generation.clone(),
                config.flow.critique_enabled,
                config.flow.max_context_chars,
            ),
            generation,
            assembler: ContextAssembler::new(config.flow.max_context_chars),
            modes: config.modes.clone(),
            max_retrieval_loops: config.flow.max_retrieval_loops.min(MAX_LOOP_BOUND),
            max_critique_loops: config.flow.max_critique_loops.min(MAX_LOOP_BOUND),
        }
    }

    /// Drive the state machine to a terminal outcome.
    ///
    /// Returns an error for structural failures (every collection down,
    /// generation backend unreachable) and for cancellation, which is checked
    /// before every node.
    pub async fn run(&self, mut state: FlowState, cancel: &CancellationToken) -> Result<FlowState> {
        let mut node = FlowNode::Retrieve;

        for _ in 0..MAX_STEPS {
            if cancel.is_cancelled() {
                info!(request_id = %state.request_id, "Flow cancelled before {:?}", node);
                return Err(RiksRagError::Cancelled);
            }
            state.trace.push(node);
            debug!(request_id = %state.request_id, "Flow node {:?}", node);

            node = match node {
                FlowNode::Retrieve => self.retrieve(&mut state).await?,
                FlowNode::Grade => self.grade(&mut state).await,
                FlowNode::TransformQuery => self.transform_query(&mut state).await,
                FlowNode::Generate => self.generate(&mut state).await?,
                FlowNode::Critique => self.critique(&mut state).await,
                FlowNode::Fallback => Self::fallback(&mut state),
                FlowNode::End => {
                    info!(
                        request_id = %state.request_id,
                        outcome = ?state.outcome,
                        retrieval_loops = state.retrieval_loop_count,
                        critique_loops = state.critique_loop_count,
                        "Flow finished"
                    );
                    return Ok(state);
                }
            };
        }

        warn!(request_id = %state.request_id, "Flow hit the step guard");
        state.pending_fallback = Some(FallbackReason::StepLimit);
        Self::fallback(&mut state);
        Ok(state)
    }

    async fn retrieve(&self, state: &mut FlowState) -> Result<FlowNode> {
        let outcome = self
            .retrieval
            .search(&state.search_query, state.k, state.strategy, &state.history)
            .await?;

        for collection in &outcome.metrics.degraded_collections {
            if !state.degraded_collections.contains(collection) {
                state.degraded_collections.push(collection.clone());
            }
        }
        state.low_confidence = outcome.metrics.low_confidence;
        state.confidence = Some(outcome.report.clone());
        let abstain = outcome.abstain();
        state.documents = outcome.results;
        state.retrieval_metrics.push(outcome.metrics);

        if abstain {
            info!(request_id = %state.request_id, "Retrieval abstained");
            state.documents.clear();
            return Ok(state.route_to_fallback(FallbackReason::Abstain));
        }
        Ok(FlowNode::Grade)
    }

    async fn grade(&self, state: &mut FlowState) -> FlowNode {
        let documents = std::mem::take(&mut state.documents);
        let outcome = self
            .grader
            .filter(&state.question, documents, &mut state.grade_cache)
            .await;
        state.grading_errors += outcome.errors;
        state.documents = outcome.relevant;
        state.web_search_needed = state.documents.is_empty();

        if state.web_search_needed {
            FlowNode::TransformQuery
        } else {
            FlowNode::Generate
        }
    }

    async fn transform_query(&self, state: &mut FlowState) -> FlowNode {
        if state.retrieval_loop_count >= self.max_retrieval_loops {
            return state.route_to_fallback(FallbackReason::RetrievalExhausted);
        }
        state.retrieval_loop_count += 1;
        state.search_query = self
            .retrieval
            .transformer()
            .transform_for_retry(&state.question, &state.search_query, state.retrieval_loop_count)
            .await;
        info!(
            request_id = %state.request_id,
            attempt = state.retrieval_loop_count,
            "No relevant documents, retrying with: {}",
            state.search_query
        );
        FlowNode::Retrieve
    }

    async fn generate(&self, state: &mut FlowState) -> Result<FlowNode> {
        if state.drafts_generated > 0 {
            state.critique_loop_count += 1;
        }
        state.drafts_generated += 1;

        let context = self.assembler.assemble(&state.documents);
        let messages = build_answer_messages(
            state.mode,
            &state.question,
            &state.history,
            &context,
            state.constitutional_feedback.as_deref(),
        );
        let params = self.params_for(state.mode);

        if state.mode == ResponseMode::Evidence {
            match complete_structured::<StructuredAnswer>(self.generation.as_ref(), &messages, &params)
                .await
            {
                Ok(structured) => {
                    state.generation = structured.answer;
                    state.citations = structured.citations;
                }
                Err(RiksRagError::StructuredOutputParse(e)) => {
                    warn!(request_id = %state.request_id, "Structured answer unusable: {}", e);
                    return Ok(state.route_to_fallback(FallbackReason::StructuredOutput));
                }
                Err(e) => return Err(e),
            }
        } else {
            state.generation = self.generation.complete(&messages, &params).await?;
        }
        Ok(FlowNode::Critique)
    }

    async fn critique(&self, state: &mut FlowState) -> FlowNode {
        let verdict = self
            .critic
            .critique(&state.question, &state.generation, &state.documents, state.mode)
            .await;

        match verdict {
            CritiqueVerdict::Approved => {
                state.constitutional_feedback = None;
                state.outcome = Some(FlowOutcome::Approved);
                FlowNode::End
            }
            CritiqueVerdict::Reject(feedback) => {
                if state.critique_loop_count >= self.max_critique_loops {
                    return state.route_to_fallback(FallbackReason::CritiqueExhausted);
                }
                debug!(request_id = %state.request_id, "Draft rejected: {}", feedback);
                state.constitutional_feedback = Some(feedback);
                FlowNode::Generate
            }
            CritiqueVerdict::Unrepairable(reason) => {
                state.route_to_fallback(FallbackReason::Unrepairable(reason))
            }
        }
    }

    fn fallback(state: &mut FlowState) -> FlowNode {
        let reason = state
            .pending_fallback
            .take()
            .unwrap_or(FallbackReason::RetrievalExhausted);
        info!(request_id = %state.request_id, reason = %reason, "Falling back to refusal");
        state.generation = REFUSAL_TEXT.to_string();
        state.citations.clear();
        state.outcome = Some(FlowOutcome::Fallback(reason));
        FlowNode::End
    }

    fn params_for(&self, mode: ResponseMode) -> GenerationParams {
        let params = match mode {
            ResponseMode::Evidence => self.modes.evidence,
            ResponseMode::Assist => self.modes.assist,
            ResponseMode::Chat => self.modes.chat,
        };
        GenerationParams::new(params.temperature, params.max_tokens)
    }
}
