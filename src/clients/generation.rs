//! OpenAI-compatible chat-completion client (vLLM, Ollama `/v1`, llama.cpp server)

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use super::BackoffPolicy;
use super::GenerationClient;
use crate::config::LlmConfig;
use crate::errors::Result;
use crate::errors::RiksRagError;
use crate::llm::streaming::sse_data;
use crate::llm::streaming::TokenStream;
use crate::llm::ChatMessage;
use crate::llm::GenerationParams;
use crate::llm::StreamingResponse;

pub struct OpenAiCompatibleClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    timeout: Duration,
    backoff: BackoffPolicy,
    client: Client,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f32,
    max_tokens: usize,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        // Per-call deadlines are enforced with tokio timeouts, the client only
        // bounds connection setup
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| RiksRagError::HttpError(e.to_string()))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            backoff: BackoffPolicy::from_config(config),
            client,
        })
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        params: &'a GenerationParams,
        stream: bool,
    ) -> CompletionRequest<'a> {
        CompletionRequest {
            model: params.model.as_deref().unwrap_or(&self.model),
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
            response_format: params.json_mode.then_some(ResponseFormat {
                kind: "json_object",
            }),
        }
    }

    async fn send(&self, body: &CompletionRequest<'_>) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.endpoint);
        let mut request = self.client.post(&url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(classify_send_error)?;
        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            let text = response.text().await.unwrap_or_default();
            return Err(RiksRagError::GenerationConnection(format!(
                "backend returned {status}: {text}"
            )));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RiksRagError::Generation(format!(
                "backend returned {status}: {text}"
            )));
        }
        Ok(response)
    }

    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let body = self.request_body(messages, params, false);
        let response = self.send(&body).await?;
        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| RiksRagError::Generation(format!("Failed to parse response: {e}")))?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| RiksRagError::Generation("Empty completion".to_string()))
    }
}

fn classify_send_error(e: reqwest::Error) -> RiksRagError {
    if e.is_connect() || e.is_request() || e.is_timeout() {
        RiksRagError::GenerationConnection(e.to_string())
    } else {
        RiksRagError::HttpError(e.to_string())
    }
}

/// Parse complete SSE lines from `buffer`, pushing content deltas onto `out`.
/// Returns true once the `[DONE]` sentinel was seen.
/// Lines are split on raw bytes so a multi-byte character cut by a chunk
/// boundary is only decoded once the whole line has arrived.
fn drain_sse_lines(buffer: &mut Vec<u8>, out: &mut VecDeque<String>) -> bool {
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = buffer.drain(..=pos).collect();
        let line = String::from_utf8_lossy(&raw);
        let Some(data) = sse_data(&line) else {
            continue;
        };
        if data == "[DONE]" {
            return true;
        }
        match serde_json::from_str::<StreamChunk>(data) {
            Ok(chunk) => {
                for choice in chunk.choices {
                    if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                        out.push_back(content);
                    }
                }
            }
            Err(e) => debug!("Skipping unparsable stream chunk: {}", e),
        }
    }
    false
}

#[async_trait]
impl GenerationClient for OpenAiCompatibleClient {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<String> {
        let timeout = self.timeout;
        self.backoff
            .run("chat completion", || async {
                tokio::time::timeout(timeout, self.complete_once(messages, params))
                    .await
                    .map_err(|_| RiksRagError::GenerationTimeout(timeout.as_secs()))?
            })
            .await
    }

    async fn complete_stream(
        &self,
        messages: &[ChatMessage],
        params: &GenerationParams,
    ) -> Result<StreamingResponse> {
        let timeout = self.timeout;
        let body = self.request_body(messages, params, true);
        let response = self
            .backoff
            .run("streaming chat completion", || async {
                tokio::time::timeout(timeout, self.send(&body))
                    .await
                    .map_err(|_| RiksRagError::GenerationTimeout(timeout.as_secs()))?
            })
            .await?;

        let bytes = response.bytes_stream().boxed();
        let state = (bytes, Vec::<u8>::new(), VecDeque::new(), false);

        let stream: TokenStream = Box::pin(futures::stream::unfold(
            state,
            move |(mut bytes, mut buffer, mut pending, mut done)| async move {
                loop {
                    if let Some(token) = pending.pop_front() {
                        return Some((Ok(token), (bytes, buffer, pending, done)));
                    }
                    if done {
                        return None;
                    }
                    match tokio::time::timeout(timeout, bytes.next()).await {
                        Err(_) => {
                            done = true;
                            return Some((
                                Err(RiksRagError::GenerationTimeout(timeout.as_secs())),
                                (bytes, buffer, pending, done),
                            ));
                        }
                        Ok(None) => {
                            buffer.push(b'\n');
                            drain_sse_lines(&mut buffer, &mut pending);
                            done = true;
                        }
                        Ok(Some(Err(e))) => {
                            done = true;
                            return Some((
                                Err(RiksRagError::GenerationConnection(e.to_string())),
                                (bytes, buffer, pending, done),
                            ));
                        }
                        Ok(Some(Ok(chunk))) => {
                            buffer.extend_from_slice(&chunk);
                            done = drain_sse_lines(&mut buffer, &mut pending);
                        }
                    }
                }
            },
        ));

        Ok(StreamingResponse::new(stream))
    }
}
