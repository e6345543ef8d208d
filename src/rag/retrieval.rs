//! Multi-collection retrieval with Parallel, Rewrite, Fusion and Adaptive strategies

use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use futures::future::join_all;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::confidence::ConfidenceDecision;
use super::confidence::ConfidenceEvaluator;
use super::confidence::ConfidenceInput;
use super::confidence::ConfidenceReport;
use super::merger::Merger;
use super::query_transform::QueryTransformer;
use crate::clients::Embedder;
use crate::clients::GenerationClient;
use crate::clients::ScoringClient;
use crate::clients::VectorHit;
use crate::clients::VectorSearchClient;
use crate::config::AppConfig;
use crate::config::RetrievalConfig;
use crate::errors::Result;
use crate::errors::RiksRagError;
use crate::models::Document;
use crate::models::HistoryTurn;
use crate::models::QueryPlan;
use crate::models::RankedList;
use crate::models::ScoredResult;
use crate::models::Strategy;

/// One rung of the adaptive ladder
#[derive(Debug, Clone, Serialize)]
pub struct EscalationStep {
    pub step: char,
    pub k: usize,
    pub composite_score: f32,
    pub decision: ConfidenceDecision,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RetrievalMetrics {
    pub strategy: Strategy,
    pub steps: Vec<EscalationStep>,
    pub final_step: Option<char>,
    pub collections_queried: usize,
    /// Collection queries that failed or timed out
    pub collection_errors: usize,
    pub degraded_collections: Vec<String>,
    pub queries_issued: usize,
    pub reranked: bool,
    pub low_confidence: bool,
    pub elapsed_ms: u64,
}

impl RetrievalMetrics {
    fn absorb(&mut self, pass: &Pass) {
        self.queries_issued += 1;
        self.collections_queried += pass.queried;
        self.collection_errors += pass.failed.len();
        for collection in &pass.failed {
            if !self.degraded_collections.contains(collection) {
                self.degraded_collections.push(collection.clone());
            }
        }
    }

    fn push_step(&mut self, step: char, k: usize, report: &ConfidenceReport) {
        self.steps.push(EscalationStep {
            step,
            k,
            composite_score: report.composite_score,
            decision: report.decision,
        });
    }
}

/// Result of one `search` call
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: Vec<ScoredResult>,
    pub report: ConfidenceReport,
    pub metrics: RetrievalMetrics,
    pub plan: QueryPlan,
}

impl SearchOutcome {
    /// Retrieval decided the evidence is insufficient
    pub fn abstain(&self) -> bool {
        self.report.is_abstain()
    }
}

/// One query fanned out over every collection
#[derive(Debug, Default)]
struct Pass {
    lists: Vec<RankedList>,
    failed: Vec<String>,
    queried: usize,
}

pub struct RetrievalOrchestrator {
    embedder: Arc<dyn Embedder>,
    vector_store: Arc<dyn VectorSearchClient>,
    reranker: Option<Arc<dyn ScoringClient>>,
    transformer: QueryTransformer,
    merger: Merger,
    evaluator: ConfidenceEvaluator,
    collections: Vec<String>,
    collection_timeout: Duration,
    config: RetrievalConfig,
}

impl RetrievalOrchestrator {
    pub fn new(
        config: &AppConfig,
        embedder: Arc<dyn Embedder>,
        vector_store: Arc<dyn VectorSearchClient>,
        generation: Arc<dyn GenerationClient>,
        reranker: Option<Arc<dyn ScoringClient>>,
    ) -> Self {
        Self {
            embedder,
            vector_store,
            reranker,
            transformer: QueryTransformer::new(generation),
            merger: Merger::new(config.retrieval.rrf_k),
            evaluator: ConfidenceEvaluator::new(
                &config.confidence,
                config.vector_store.statute_collections.clone(),
            ),
            collections: config.vector_store.collections.clone(),
            collection_timeout: Duration::from_secs(config.vector_store.timeout_secs),
            config: config.retrieval.clone(),
        }
    }

    /// Override the per-collection deadline
    #[must_use]
    pub const fn with_collection_timeout(mut self, timeout: Duration) -> Self {
        self.collection_timeout = timeout;
        self
    }

    pub fn transformer(&self) -> &QueryTransformer {
        &self.transformer
    }

    /// Search all collections with the given strategy.
    ///
    /// Fails with `Retrieval` only when every collection query failed. An
    /// abstain decision is reported through `SearchOutcome::abstain`.
    pub async fn search(
        &self,
        question: &str,
        k: usize,
        strategy: Strategy,
        history: &[HistoryTurn],
    ) -> Result<SearchOutcome> {
        let started = Instant::now();
        let k = k.max(1);
        let mut metrics = RetrievalMetrics {
            strategy,
            ..RetrievalMetrics::default()
        };
        let mut plan = QueryPlan {
            original_question: question.to_string(),
            rewritten_question: None,
            strategy,
            collections: self.collections.clone(),
            k,
        };

        let (results, report) = match strategy {
            Strategy::Parallel => self.run_parallel(question, k, "parallel", &mut metrics).await?,
            Strategy::Rewrite => {
                let rewritten = self.transformer.decontextualize(question, history).await;
                if rewritten != question {
                    plan.rewritten_question = Some(rewritten);
                }
                self.run_parallel(plan.effective_question(), k, "rewrite", &mut metrics)
                    .await?
            }
            Strategy::Fusion => self.run_fusion(question, k, &mut metrics).await?,
            Strategy::Adaptive => self.run_adaptive(question, k, &mut metrics).await?,
        };

        metrics.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            strategy = %strategy,
            results = results.len(),
            composite = report.composite_score,
            decision = ?report.decision,
            degraded = metrics.collection_errors,
            "Retrieval finished in {}ms",
            metrics.elapsed_ms
        );

        Ok(SearchOutcome {
            results,
            report,
            metrics,
            plan,
        })
    }

    /// Embed once, then query every collection concurrently. Failures and
    /// timeouts are recorded per collection and never abort the others.
    async fn parallel_pass(&self, query: &str, k: usize, tag: &str) -> Pass {
        let mut pass = Pass {
            queried: self.collections.len(),
            ..Pass::default()
        };

        let embedding = match self.embedder.embed(query).await {
            Ok(embedding) => embedding,
            Err(e) => {
                warn!("Embedding failed for {} query: {}", tag, e);
                pass.failed = self.collections.clone();
                return pass;
            }
        };

        let searches = self.collections.iter().map(|collection| {
            let embedding = &embedding;
            async move {
                let outcome = tokio::time::timeout(
                    self.collection_timeout,
                    self.vector_store.query(collection, embedding, k),
                )
                .await;
                (collection, outcome)
            }
        });

        for (collection, outcome) in join_all(searches).await {
            match outcome {
                Ok(Ok(hits)) => {
                    debug!(collection = %collection, hits = hits.len(), "Collection answered");
                    pass.lists.push(ranked_list(collection, tag, hits));
                }
                Ok(Err(e)) => {
                    warn!(collection = %collection, "Collection query failed: {}", e);
                    pass.failed.push(collection.clone());
                }
                Err(_) => {
                    warn!(
                        collection = %collection,
                        "Collection query timed out after {:?}",
                        self.collection_timeout
                    );
                    pass.failed.push(collection.clone());
                }
            }
        }
        pass
    }

    async fn run_parallel(
        &self,
        query: &str,
        k: usize,
        tag: &str,
        metrics: &mut RetrievalMetrics,
    ) -> Result<(Vec<ScoredResult>, ConfidenceReport)> {
        let pass = self.parallel_pass(query, k, tag).await;
        metrics.absorb(&pass);
        if pass.lists.is_empty() {
            return Err(self.all_failed());
        }

        let merged = self.merger.merge(&pass.lists);
        let results = self.finalize(query, merged, k, metrics).await;
        let report = self.evaluate(query, &results, k, None);
        Ok((results, report))
    }

    async fn run_fusion(
        &self,
        question: &str,
        k: usize,
        metrics: &mut RetrievalMetrics,
    ) -> Result<(Vec<ScoredResult>, ConfidenceReport)> {
        let variants = self
            .transformer
            .generate_variants(question, self.config.fusion_variants)
            .await;
        debug!("Fusion over {} queries", variants.len());

        let passes = join_all(variants.iter().enumerate().map(|(i, variant)| async move {
            let tag = format!("fusion{i}");
            self.parallel_pass(variant, k, &tag).await
        }))
        .await;

        let mut lists = Vec::new();
        let mut sub_query_tops = Vec::with_capacity(passes.len());
        for pass in passes {
            metrics.absorb(&pass);
            sub_query_tops.push(
                self.merger
                    .merge(&pass.lists)
                    .first()
                    .map(|r| r.id().to_string()),
            );
            lists.extend(pass.lists);
        }
        if lists.is_empty() {
            return Err(self.all_failed());
        }

        let merged = self.merger.merge(&lists);
        let results = self.finalize(question, merged, k, metrics).await;
        let report = self.evaluate(question, &results, k, Some(&sub_query_tops));
        Ok((results, report))
    }

    /// A: Parallel at k. B: Parallel at a larger k. C: Fusion. D: best effort.
    /// Accept or Abstain at any step ends the ladder.
    async fn run_adaptive(
        &self,
        question: &str,
        k: usize,
        metrics: &mut RetrievalMetrics,
    ) -> Result<(Vec<ScoredResult>, ConfidenceReport)> {
        let mut attempts: Vec<(char, Vec<ScoredResult>, ConfidenceReport)> = Vec::new();
        let wide_k = k * self.config.escalation_k_multiplier.max(1);

        for step in ['A', 'B', 'C'] {
            let (results, report, step_k) = match step {
                'A' => {
                    let (r, c) = self.run_parallel(question, k, "adaptive:A", metrics).await?;
                    (r, c, k)
                }
                'B' => {
                    let (r, c) = self
                        .run_parallel(question, wide_k, "adaptive:B", metrics)
                        .await?;
                    (r, c, wide_k)
                }
                _ => {
                    let (r, c) = self.run_fusion(question, k, metrics).await?;
                    (r, c, k)
                }
            };
            metrics.push_step(step, step_k, &report);
            debug!(
                "Adaptive step {}: composite {:.3} -> {:?}",
                step, report.composite_score, report.decision
            );

            if report.decision != ConfidenceDecision::Escalate {
                metrics.final_step = Some(step);
                return Ok((results, report));
            }
            attempts.push((step, results, report));
        }

        // D: nothing reached the accept threshold; return the strongest set
        let mut best_idx = 0;
        for (idx, (_, _, report)) in attempts.iter().enumerate() {
            if report.composite_score > attempts[best_idx].2.composite_score {
                best_idx = idx;
            }
        }
        let (from_step, results, report) = attempts.swap_remove(best_idx);
        info!(
            "Adaptive retrieval exhausted, returning step {} results with low confidence",
            from_step
        );
        metrics.push_step('D', results.len(), &report);
        metrics.final_step = Some('D');
        metrics.low_confidence = true;
        Ok((results, report))
    }

    /// Cut to `k` and apply the cross-encoder when one is configured
    async fn finalize(
        &self,
        query: &str,
        mut merged: Vec<ScoredResult>,
        k: usize,
        metrics: &mut RetrievalMetrics,
    ) -> Vec<ScoredResult> {
        merged.truncate(k);
        let Some(reranker) = &self.reranker else {
            return merged;
        };
        if merged.is_empty() {
            return merged;
        }

        let texts: Vec<String> = merged.iter().map(|r| r.document.text.clone()).collect();
        match reranker.rerank(query, &texts).await {
            Ok(scores) if scores.len() == merged.len() => {
                let squash = scores.iter().any(|s| !(0.0..=1.0).contains(s));
                for (result, score) in merged.iter_mut().zip(scores) {
                    result.score = score;
                    result.similarity = if squash { sigmoid(score) } else { score };
                }
                merged.sort_by(|a, b| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                });
                for (idx, result) in merged.iter_mut().enumerate() {
                    result.rank = idx;
                }
                metrics.reranked = true;
            }
            Ok(scores) => warn!(
                "Reranker returned {} scores for {} results, keeping fused order",
                scores.len(),
                merged.len()
            ),
            Err(e) => warn!("Rerank failed, keeping fused order: {}", e),
        }
        merged
    }

    fn evaluate(
        &self,
        query: &str,
        results: &[ScoredResult],
        k: usize,
        sub_query_tops: Option<&[Option<String>]>,
    ) -> ConfidenceReport {
        self.evaluator.evaluate(&ConfidenceInput {
            query,
            results,
            k_requested: k,
            sub_query_tops,
        })
    }

    fn all_failed(&self) -> RiksRagError {
        RiksRagError::Retrieval(format!(
            "all {} collections failed",
            self.collections.len()
        ))
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Build a ranked list from raw hits, ordered by descending similarity
fn ranked_list(collection: &str, tag: &str, mut hits: Vec<VectorHit>) -> RankedList {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let list_tag = format!("{tag}:{collection}");
    let results = hits
        .into_iter()
        .enumerate()
        .map(|(rank, hit)| {
            let document = Arc::new(Document {
                id: hit.doc_id,
                text: hit.text,
                source_collection: collection.to_string(),
                metadata: hit.metadata,
            });
            ScoredResult::new(document, hit.score, rank, list_tag.clone())
        })
        .collect();
    RankedList::new(list_tag, results)
}
