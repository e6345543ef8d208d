//! Chat-completion message types, streaming and structured output helpers

pub mod prompts;
pub mod streaming;
pub mod structured;

use serde::Deserialize;
use serde::Serialize;

pub use prompts::PromptTemplate;
pub use prompts::RagPrompts;
pub use streaming::is_keep_alive_frame;
pub use streaming::StreamingResponse;
pub use structured::complete_structured;
pub use structured::StructuredAnswer;

/// One chat message in an OpenAI-compatible conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Sampling parameters for one completion call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Overrides the client's default model
    pub model: Option<String>,
    pub temperature: f32,
    pub max_tokens: usize,
    /// Ask the backend for a JSON object response
    pub json_mode: bool,
}

impl GenerationParams {
    pub fn new(temperature: f32, max_tokens: usize) -> Self {
        Self {
            model: None,
            temperature,
            max_tokens,
            json_mode: false,
        }
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self::new(0.2, 1024)
    }
}
