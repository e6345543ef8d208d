//! Relevance grading on the generation backend and cross-encoder reranking

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;

use super::GenerationClient;
use super::ScoringClient;
use crate::config::AppConfig;
use crate::errors::Result;
use crate::errors::RiksRagError;
use crate::llm::ChatMessage;
use crate::llm::GenerationParams;
use crate::llm::RagPrompts;

/// Longest document excerpt sent to the grader
const GRADE_EXCERPT_CHARS: usize = 2_000;

pub struct LlmScoringClient {
    generation: Arc<dyn GenerationClient>,
    grader_model: String,
    reranker_endpoint: Option<String>,
    client: Client,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct RerankResponse {
    scores: Vec<f32>,
}

impl LlmScoringClient {
    pub fn new(generation: Arc<dyn GenerationClient>, config: &AppConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.reranker.timeout_secs))
            .build()
            .map_err(|e| RiksRagError::HttpError(e.to_string()))?;
        Ok(Self {
            generation,
            grader_model: config.llm.grader_model().to_string(),
            reranker_endpoint: config
                .reranker
                .enabled
                .then(|| config.reranker.endpoint.trim_end_matches('/').to_string()),
            client,
        })
    }
}

/// Interpret a grader reply. Anything that does not start with a yes is a no.
pub fn parse_grade(reply: &str) -> bool {
    let normalized = reply
        .trim()
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    normalized.starts_with("ja") || normalized.starts_with("yes")
}

#[async_trait]
impl ScoringClient for LlmScoringClient {
    async fn grade(&self, text: &str, question: &str) -> Result<bool> {
        let excerpt: String = text.chars().take(GRADE_EXCERPT_CHARS).collect();
        let prompt =
            RagPrompts::grade_document().render_with(&[("question", question), ("document", &excerpt)]);
        let params = GenerationParams::new(0.0, 4).with_model(self.grader_model.clone());
        let reply = self
            .generation
            .complete(&[ChatMessage::user(prompt)], &params)
            .await?;
        Ok(parse_grade(&reply))
    }

    async fn rerank(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let endpoint = self
            .reranker_endpoint
            .as_ref()
            .ok_or_else(|| RiksRagError::ConfigError("Reranker is disabled".to_string()))?;

        let response = self
            .client
            .post(format!("{endpoint}/rerank"))
            .json(&RerankRequest { query, texts })
            .send()
            .await
            .map_err(|e| RiksRagError::HttpError(format!("reranker: {e}")))?;

        if !response.status().is_success() {
            return Err(RiksRagError::HttpError(format!(
                "reranker returned {}",
                response.status()
            )));
        }

        let body: RerankResponse = response
            .json()
            .await
            .map_err(|e| RiksRagError::HttpError(format!("reranker: bad response: {e}")))?;
        if body.scores.len() != texts.len() {
            return Err(RiksRagError::HttpError(format!(
                "reranker returned {} scores for {} texts",
                body.scores.len(),
                texts.len()
            )));
        }
        Ok(body.scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_grade() {
        assert!(parse_grade("Ja"));
        assert!(parse_grade("  ja."));
        assert!(parse_grade("Yes"));
        assert!(parse_grade("\"ja\""));
        assert!(!parse_grade("Nej"));
        assert!(!parse_grade("no"));
        assert!(!parse_grade(""));
        assert!(!parse_grade("kanske"));
    }
}
