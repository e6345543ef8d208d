//! Confidence scoring for a retrieved result set

use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Serialize;

use super::query_transform::content_terms;
use crate::config::ConfidenceConfig;
use crate::models::ScoredResult;

pub const TOP1_SCORE: &str = "top1_score";
pub const SCORE_SPREAD: &str = "score_spread";
pub const AGREEMENT_ACROSS_QUERIES: &str = "agreement_across_queries";
pub const SFS_PRIORITY_HIT: &str = "sfs_priority_hit";
pub const RESULT_COUNT: &str = "result_count";
pub const MEAN_TOP3: &str = "mean_top3";
pub const QUERY_TERM_COVERAGE: &str = "query_term_coverage";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceDecision {
    Accept,
    Escalate,
    Abstain,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceReport {
    pub signals: BTreeMap<String, f32>,
    pub composite_score: f32,
    pub decision: ConfidenceDecision,
}

impl ConfidenceReport {
    pub fn is_accept(&self) -> bool {
        self.decision == ConfidenceDecision::Accept
    }

    pub fn is_abstain(&self) -> bool {
        self.decision == ConfidenceDecision::Abstain
    }
}

/// What the evaluator looks at for one result set
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInput<'a> {
    pub query: &'a str,
    pub results: &'a [ScoredResult],
    pub k_requested: usize,
    /// Top document id of each sub-query (Fusion only)
    pub sub_query_tops: Option<&'a [Option<String>]>,
}

pub struct ConfidenceEvaluator {
    weights: BTreeMap<String, f32>,
    low_threshold: f32,
    high_threshold: f32,
    statute_collections: Vec<String>,
}

impl ConfidenceEvaluator {
    pub fn new(config: &ConfidenceConfig, statute_collections: Vec<String>) -> Self {
        Self {
            weights: config.weights.clone(),
            low_threshold: config.low_threshold,
            high_threshold: config.high_threshold,
            statute_collections,
        }
    }

    /// Compute every signal, combine them and decide. Pure: no I/O, no state.
    pub fn evaluate(&self, input: &ConfidenceInput<'_>) -> ConfidenceReport {
        let signals = self.signals(input);
        let composite_score = self.composite(&signals);
        let decision = self.decide(composite_score);
        ConfidenceReport {
            signals,
            composite_score,
            decision,
        }
    }

    pub fn decide(&self, composite: f32) -> ConfidenceDecision {
        if composite < self.low_threshold {
            ConfidenceDecision::Abstain
        } else if composite < self.high_threshold {
            ConfidenceDecision::Escalate
        } else {
            ConfidenceDecision::Accept
        }
    }

    fn signals(&self, input: &ConfidenceInput<'_>) -> BTreeMap<String, f32> {
        let mut signals = BTreeMap::new();
        let results = input.results;

        let Some(top) = results.first() else {
            // Nothing retrieved: every signal that could be measured is zero
            for name in [TOP1_SCORE, RESULT_COUNT, QUERY_TERM_COVERAGE] {
                signals.insert(name.to_string(), 0.0);
            }
            return signals;
        };

        let k = input.k_requested.max(1);
        let top1 = unit(top.similarity);
        signals.insert(TOP1_SCORE.to_string(), top1);

        let tail_idx = k.min(results.len()) - 1;
        let spread = if tail_idx == 0 {
            top1
        } else {
            top1 - unit(results[tail_idx].similarity)
        };
        signals.insert(SCORE_SPREAD.to_string(), unit(spread));

        if let Some(tops) = input.sub_query_tops.filter(|t| t.len() > 1) {
            let agreeing = tops
                .iter()
                .filter(|id| id.as_deref() == Some(top.id()))
                .count();
            signals.insert(
                AGREEMENT_ACROSS_QUERIES.to_string(),
                agreeing as f32 / tops.len() as f32,
            );
        }

        let top3 = &results[..results.len().min(3)];
        let sfs_hit = top3
            .iter()
            .any(|r| r.document.is_statute(&self.statute_collections));
        signals.insert(SFS_PRIORITY_HIT.to_string(), if sfs_hit { 1.0 } else { 0.0 });

        signals.insert(
            RESULT_COUNT.to_string(),
            unit(results.len() as f32 / k as f32),
        );

        let mean = top3.iter().map(|r| unit(r.similarity)).sum::<f32>() / top3.len() as f32;
        signals.insert(MEAN_TOP3.to_string(), mean);

        signals.insert(
            QUERY_TERM_COVERAGE.to_string(),
            term_coverage(input.query, top3),
        );

        signals
    }

    /// Weighted mean over the signals that were measured and carry a weight
    fn composite(&self, signals: &BTreeMap<String, f32>) -> f32 {
        let mut weighted = 0.0;
        let mut total_weight = 0.0;
        for (name, value) in signals {
            if let Some(&weight) = self.weights.get(name) {
                weighted += weight * value;
                total_weight += weight;
            }
        }
        if total_weight <= f32::EPSILON {
            return 0.0;
        }
        unit(weighted / total_weight)
    }
}

fn unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Fraction of the query's content words found in the top documents
fn term_coverage(query: &str, top: &[ScoredResult]) -> f32 {
    let terms: HashSet<String> = content_terms(query).into_iter().collect();
    if terms.is_empty() {
        return 0.0;
    }
    let haystack: String = top
        .iter()
        .map(|r| r.document.text.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let covered = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    covered as f32 / terms.len() as f32
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::Document;
    use crate::models::DocumentMetadata;

    fn evaluator() -> ConfidenceEvaluator {
        ConfidenceEvaluator::new(&ConfidenceConfig::default(), vec!["sfs".to_string()])
    }

    fn result(id: &str, collection: &str, text: &str, similarity: f32) -> ScoredResult {
        let doc = Arc::new(Document {
            id: id.to_string(),
            text: text.to_string(),
            source_collection: collection.to_string(),
            metadata: DocumentMetadata::default(),
        });
        ScoredResult::new(doc, similarity, 0, collection)
    }

    #[test]
    fn test_empty_results_abstain() {
        let report = evaluator().evaluate(&ConfidenceInput {
            query: "vad säger dataskyddslagen",
            results: &[],
            k_requested: 10,
            sub_query_tops: None,
        });
        assert_eq!(report.decision, ConfidenceDecision::Abstain);
        assert_eq!(report.composite_score, 0.0);
    }

    #[test]
    fn test_strong_statute_match_accepts() {
        let text = "Dataskyddslagen kompletterar dataskyddsförordningen om personuppgifter";
        let results: Vec<ScoredResult> = (0..10)
            .map(|i| {
                let sim = if i == 0 { 0.95 } else { 0.6 };
                let coll = if i == 0 { "sfs" } else { "prop" };
                result(&format!("d{i}"), coll, text, sim)
            })
            .collect();
        let report = evaluator().evaluate(&ConfidenceInput {
            query: "Vad reglerar dataskyddslagen om personuppgifter?",
            results: &results,
            k_requested: 10,
            sub_query_tops: None,
        });
        assert_eq!(report.signals[SFS_PRIORITY_HIT], 1.0);
        assert_eq!(report.signals[RESULT_COUNT], 1.0);
        assert!(!report.signals.contains_key(AGREEMENT_ACROSS_QUERIES));
        assert_eq!(report.decision, ConfidenceDecision::Accept, "{report:?}");
    }

    #[test]
    fn test_weak_scattered_results_do_not_accept() {
        let results = vec![
            result("a", "prop", "något helt annat", 0.3),
            result("b", "prop", "ännu mer orelaterat", 0.28),
        ];
        let report = evaluator().evaluate(&ConfidenceInput {
            query: "Vilka regler gäller för kameraövervakning?",
            results: &results,
            k_requested: 10,
            sub_query_tops: None,
        });
        assert_ne!(report.decision, ConfidenceDecision::Accept);
    }

    #[test]
    fn test_agreement_signal_counts_matching_tops() {
        let results = vec![result("a", "sfs", "text", 0.8)];
        let tops = vec![Some("a".to_string()), Some("b".to_string()), Some("a".to_string()), None];
        let report = evaluator().evaluate(&ConfidenceInput {
            query: "text",
            results: &results,
            k_requested: 1,
            sub_query_tops: Some(&tops),
        });
        assert!((report.signals[AGREEMENT_ACROSS_QUERIES] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_composite_stays_in_unit_interval_with_overridden_weight() {
        let mut config = ConfidenceConfig::default();
        config.weights.insert(TOP1_SCORE.to_string(), 50.0);
        let evaluator = ConfidenceEvaluator::new(&config, vec![]);
        let results = vec![result("a", "x", "text", 1.0)];
        let report = evaluator.evaluate(&ConfidenceInput {
            query: "text",
            results: &results,
            k_requested: 1,
            sub_query_tops: None,
        });
        assert!((0.0..=1.0).contains(&report.composite_score));
    }

    #[test]
    fn test_thresholds() {
        let e = evaluator();
        assert_eq!(e.decide(0.1), ConfidenceDecision::Abstain);
        assert_eq!(e.decide(0.35), ConfidenceDecision::Escalate);
        assert_eq!(e.decide(0.5), ConfidenceDecision::Escalate);
        assert_eq!(e.decide(0.65), ConfidenceDecision::Accept);
    }
}
