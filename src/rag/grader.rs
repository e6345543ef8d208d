//! Per-document relevance grading (corrective RAG)

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream;
use futures::StreamExt;
use tracing::debug;
use tracing::warn;

use crate::clients::ScoringClient;
use crate::config::GradingConfig;
use crate::errors::Result;
use crate::models::Document;
use crate::models::ScoredResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    Relevant,
    Irrelevant,
}

/// Result of filtering one working set
#[derive(Debug, Default)]
pub struct GradingOutcome {
    pub relevant: Vec<ScoredResult>,
    pub irrelevant: usize,
    /// Grading calls that failed; those documents were kept
    pub errors: usize,
    /// Documents whose grade came from an earlier round of this request
    pub cached: usize,
}

pub struct Grader {
    scoring: Arc<dyn ScoringClient>,
    enabled: bool,
    max_concurrency: usize,
}

impl Grader {
    pub fn new(scoring: Arc<dyn ScoringClient>, config: &GradingConfig) -> Self {
        Self {
            scoring,
            enabled: config.enabled,
            max_concurrency: config.max_concurrency.max(1),
        }
    }

    /// Binary relevance of one document to the question
    pub async fn grade(&self, document: &Document, question: &str) -> Result<Grade> {
        let relevant = self.scoring.grade(&document.text, question).await?;
        Ok(if relevant {
            Grade::Relevant
        } else {
            Grade::Irrelevant
        })
    }

    /// Grade every document concurrently (bounded) and keep the relevant ones
    /// in their original order.
    ///
    /// `cache` holds grades already computed in this request and is updated
    /// with fresh ones. A failed grading call keeps the document.
    pub async fn filter(
        &self,
        question: &str,
        documents: Vec<ScoredResult>,
        cache: &mut HashMap<String, Grade>,
    ) -> GradingOutcome {
        if !self.enabled {
            return GradingOutcome {
                relevant: documents,
                ..GradingOutcome::default()
            };
        }

        let mut outcome = GradingOutcome::default();
        let known: Vec<Option<Grade>> = documents
            .iter()
            .map(|d| cache.get(d.id()).copied())
            .collect();

        let calls: Vec<_> = documents
            .iter()
            .zip(&known)
            .map(|(doc, cached)| {
                let fresh = cached.is_none();
                async move {
                    if fresh {
                        Some(self.grade(&doc.document, question).await)
                    } else {
                        None
                    }
                }
            })
            .collect();
        let graded: Vec<Option<Result<Grade>>> = stream::iter(calls)
            .buffered(self.max_concurrency)
            .collect()
            .await;

        for ((doc, cached), fresh) in documents.into_iter().zip(known).zip(graded) {
            let grade = match (cached, fresh) {
                (Some(grade), _) => {
                    outcome.cached += 1;
                    grade
                }
                (None, Some(Ok(grade))) => {
                    cache.insert(doc.id().to_string(), grade);
                    grade
                }
                (None, Some(Err(e))) => {
                    warn!("Grading failed for {}, keeping document: {}", doc.id(), e);
                    outcome.errors += 1;
                    Grade::Relevant
                }
                (None, None) => Grade::Relevant,
            };
            match grade {
                Grade::Relevant => outcome.relevant.push(doc),
                Grade::Irrelevant => outcome.irrelevant += 1,
            }
        }

        debug!(
            "Graded working set: {} relevant, {} irrelevant, {} errors, {} cached",
            outcome.relevant.len(),
            outcome.irrelevant,
            outcome.errors,
            outcome.cached
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use async_trait::async_trait;

    use super::*;
    use crate::errors::RiksRagError;
    use crate::models::DocumentMetadata;

    /// Relevant if the text contains "relevant", errors if it contains "boom"
    struct KeywordScorer {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ScoringClient for KeywordScorer {
        async fn grade(&self, text: &str, _question: &str) -> Result<bool> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if text.contains("boom") {
                return Err(RiksRagError::HttpError("grader down".to_string()));
            }
            Ok(text.contains("relevant") && !text.contains("irrelevant"))
        }

        async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            Ok(vec![0.0; texts.len()])
        }
    }

    fn doc(id: &str, text: &str) -> ScoredResult {
        let document = Arc::new(Document {
            id: id.to_string(),
            text: text.to_string(),
            source_collection: "sfs".to_string(),
            metadata: DocumentMetadata::default(),
        });
        ScoredResult::new(document, 0.5, 0, "sfs")
    }

    fn grader(enabled: bool) -> (Grader, Arc<KeywordScorer>) {
        let scorer = Arc::new(KeywordScorer {
            calls: AtomicUsize::new(0),
        });
        let config = GradingConfig {
            enabled,
            max_concurrency: 2,
        };
        (Grader::new(scorer.clone(), &config), scorer)
    }

    #[tokio::test]
    async fn test_filter_keeps_relevant_in_order() {
        let (grader, _) = grader(true);
        let docs = vec![
            doc("a", "relevant one"),
            doc("b", "irrelevant"),
            doc("c", "relevant two"),
        ];
        let outcome = grader.filter("q", docs, &mut HashMap::new()).await;
        let ids: Vec<&str> = outcome.relevant.iter().map(ScoredResult::id).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(outcome.irrelevant, 1);
    }

    #[tokio::test]
    async fn test_grading_error_fails_open() {
        let (grader, _) = grader(true);
        let outcome = grader
            .filter("q", vec![doc("a", "boom")], &mut HashMap::new())
            .await;
        assert_eq!(outcome.relevant.len(), 1);
        assert_eq!(outcome.errors, 1);
    }

    #[tokio::test]
    async fn test_already_graded_documents_are_not_regraded() {
        let (grader, scorer) = grader(true);
        let mut cache = HashMap::new();
        grader
            .filter("q", vec![doc("a", "irrelevant"), doc("b", "relevant")], &mut cache)
            .await;
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 2);

        let outcome = grader
            .filter("q", vec![doc("a", "irrelevant"), doc("c", "relevant")], &mut cache)
            .await;
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.cached, 1);
        assert_eq!(outcome.relevant.len(), 1);
        assert_eq!(outcome.relevant[0].id(), "c");
    }

    #[tokio::test]
    async fn test_disabled_grading_keeps_everything() {
        let (grader, scorer) = grader(false);
        let outcome = grader
            .filter("q", vec![doc("a", "irrelevant")], &mut HashMap::new())
            .await;
        assert_eq!(outcome.relevant.len(), 1);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    /// Records the peak number of grading calls in flight
    #[derive(Default)]
    struct SlowScorer {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ScoringClient for SlowScorer {
        async fn grade(&self, _text: &str, _question: &str) -> Result<bool> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn rerank(&self, _query: &str, texts: &[String]) -> Result<Vec<f32>> {
            Ok(vec![0.0; texts.len()])
        }
    }

    #[tokio::test]
    async fn test_grading_concurrency_is_bounded() {
        let scorer = Arc::new(SlowScorer::default());
        let config = GradingConfig::default();
        assert_eq!(config.max_concurrency, 8);
        let grader = Grader::new(scorer.clone(), &config);

        let docs: Vec<ScoredResult> = (0..20).map(|i| doc(&format!("d{i}"), "relevant")).collect();
        let outcome = grader.filter("q", docs, &mut HashMap::new()).await;

        assert_eq!(outcome.relevant.len(), 20);
        let peak = scorer.peak.load(Ordering::SeqCst);
        assert!(peak <= config.max_concurrency, "peak {peak} exceeds limit");
        // The calls did overlap
        assert!(peak > 1);
    }

    #[tokio::test]
    async fn test_empty_working_set() {
        let (grader, _) = grader(true);
        let outcome = grader.filter("q", vec![], &mut HashMap::new()).await;
        assert!(outcome.relevant.is_empty());
    }
}
