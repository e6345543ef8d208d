//! Structured (JSON) output with a single correction retry

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::ChatMessage;
use super::GenerationParams;
use crate::clients::GenerationClient;
use crate::errors::Result;
use crate::errors::RiksRagError;

const CORRECTION_INSTRUCTION: &str = "Ditt föregående svar var inte giltig JSON enligt schemat. Skicka svaret igen som ett enda giltigt JSON-objekt, utan förklaringar eller kodblock.";

/// Fixed answer schema: answer text, cited source ids, self-reported confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredAnswer {
    pub answer: String,
    #[serde(default)]
    pub citations: Vec<String>,
    #[serde(default)]
    pub confidence: f32,
}

/// Parse a JSON object out of a model reply that may be wrapped in a code fence
/// or surrounded by prose
pub fn parse_json_payload<T: DeserializeOwned>(raw: &str) -> Result<T> {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .map_or(trimmed, |rest| rest.trim_end().trim_end_matches("```"))
        .trim();

    if let Ok(value) = serde_json::from_str(unfenced) {
        return Ok(value);
    }

    let start = unfenced.find('{');
    let end = unfenced.rfind('}');
    match (start, end) {
        (Some(s), Some(e)) if s < e => serde_json::from_str(&unfenced[s..=e])
            .map_err(|err| RiksRagError::StructuredOutputParse(err.to_string())),
        _ => Err(RiksRagError::StructuredOutputParse(
            "no JSON object in reply".to_string(),
        )),
    }
}

/// Ask for JSON and parse it. A malformed reply triggers exactly one retry
/// carrying a correction instruction; a second failure is returned as
/// `StructuredOutputParse` for the caller to turn into a fallback.
pub async fn complete_structured<T: DeserializeOwned>(
    client: &dyn GenerationClient,
    messages: &[ChatMessage],
    params: &GenerationParams,
) -> Result<T> {
    let params = params.clone().json();
    let first = client.complete(messages, &params).await?;
    match parse_json_payload(&first) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!("Structured output malformed, requesting correction: {}", e);
            let mut retry = messages.to_vec();
            retry.push(ChatMessage::assistant(first));
            retry.push(ChatMessage::user(CORRECTION_INSTRUCTION));
            let second = client.complete(&retry, &params).await?;
            parse_json_payload(&second)
        }
    }
}
