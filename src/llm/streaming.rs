//! Streaming response handling

use std::pin::Pin;

use futures::Stream;
use futures::StreamExt;

use crate::errors::Result;

pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Streaming response from the generation backend
pub struct StreamingResponse {
    stream: TokenStream,
}

impl StreamingResponse {
    pub fn new(stream: TokenStream) -> Self {
        Self { stream }
    }

    /// Wrap an already complete text as a single-chunk stream
    pub fn from_text(text: String) -> Self {
        Self::new(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Collect all chunks into a single string
    pub async fn collect_all(mut self) -> Result<String> {
        let mut result = String::new();
        while let Some(chunk) = self.stream.next().await {
            result.push_str(&chunk?);
        }
        Ok(result)
    }

    /// Get the underlying stream
    pub fn into_stream(self) -> TokenStream {
        self.stream
    }
}

/// Keep-alive frames are blank lines or SSE comment lines (`: ...`).
/// Consumers must skip them before JSON-parsing event payloads.
pub fn is_keep_alive_frame(line: &str) -> bool {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    trimmed.trim().is_empty() || trimmed.starts_with(':')
}

/// Extract the payload of an SSE `data:` line, skipping keep-alive frames
pub fn sse_data(line: &str) -> Option<&str> {
    if is_keep_alive_frame(line) {
        return None;
    }
    line.strip_prefix("data:").map(str::trim)
}

/// Split a text into chunks of roughly `chunk_chars` characters, cutting at
/// whitespace so tokens are never split mid-word
pub fn chunk_text(text: &str, chunk_chars: usize) -> Vec<String> {
    let chunk_chars = chunk_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    for word in text.split_inclusive(char::is_whitespace) {
        if !current.is_empty() && current.chars().count() + word.chars().count() > chunk_chars {
            chunks.push(std::mem::take(&mut current));
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
