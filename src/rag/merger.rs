//! Reciprocal Rank Fusion and deduplication of ranked result lists

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::models::RankedList;
use crate::models::ScoredResult;

/// Conventional RRF smoothing constant
pub const DEFAULT_RRF_K: f32 = 60.0;

/// Fuses ranked lists by rank rather than by raw score, since similarity
/// scores from differently-phrased queries are not comparable.
#[derive(Debug, Clone, Copy)]
pub struct Merger {
    rrf_k: f32,
}

impl Default for Merger {
    fn default() -> Self {
        Self::new(DEFAULT_RRF_K)
    }
}

impl Merger {
    #[must_use]
    pub const fn new(rrf_k: f32) -> Self {
        Self { rrf_k }
    }

    /// Reciprocal Rank Fusion: `score(d) = Σ 1 / (rrf_k + rank)` with 1-based
    /// ranks taken from each list's order.
    ///
    /// The first occurrence of a document supplies its metadata and tag. The
    /// output is sorted by fused score descending; ties keep the better best
    /// rank, then first-seen order, so the result is deterministic for a given
    /// list order.
    #[must_use]
    pub fn merge(&self, lists: &[RankedList]) -> Vec<ScoredResult> {
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut fused: Vec<ScoredResult> = Vec::new();

        for list in lists {
            for (position, result) in list.results.iter().enumerate() {
                let contribution = 1.0 / (self.rrf_k + position as f32 + 1.0);
                match positions.get(result.id()) {
                    Some(&idx) => {
                        let entry = &mut fused[idx];
                        entry.score += contribution;
                        entry.sources_hit += 1;
                        entry.rank = entry.rank.min(position);
                        entry.similarity = entry.similarity.max(result.similarity);
                    }
                    None => {
                        positions.insert(result.id().to_string(), fused.len());
                        fused.push(ScoredResult {
                            document: result.document.clone(),
                            score: contribution,
                            similarity: result.similarity,
                            rank: position,
                            strategy_tag: result.strategy_tag.clone(),
                            sources_hit: 1,
                        });
                    }
                }
            }
        }

        // Stable sort: equal keys keep first-seen order
        fused.sort_by(|a, b| by_score_then_rank(a, b));
        renumber(&mut fused);
        fused
    }
}

/// Keep one entry per document id: the highest score wins, a tie goes to the
/// lower rank. Output is in descending score order.
#[must_use]
pub fn deduplicate(results: Vec<ScoredResult>) -> Vec<ScoredResult> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut unique: Vec<ScoredResult> = Vec::with_capacity(results.len());

    for result in results {
        match positions.get(result.id()) {
            Some(&idx) => {
                if by_score_then_rank(&result, &unique[idx]) == Ordering::Less {
                    unique[idx] = result;
                }
            }
            None => {
                positions.insert(result.id().to_string(), unique.len());
                unique.push(result);
            }
        }
    }

    unique.sort_by(by_score_then_rank);
    unique
}

/// Descending score, then ascending rank. NaN scores sort last.
fn by_score_then_rank(a: &ScoredResult, b: &ScoredResult) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or_else(|| a.score.is_nan().cmp(&b.score.is_nan()))
        .then_with(|| a.rank.cmp(&b.rank))
}

fn renumber(results: &mut [ScoredResult]) {
    for (idx, result) in results.iter_mut().enumerate() {
        result.rank = idx;
    }
}
