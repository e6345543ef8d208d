use thiserror::Error;

#[derive(Error, Debug)]
pub enum RiksRagError {
    /// Malformed request, rejected before the pipeline runs
    #[error("Validation error: {0}")]
    Validation(String),

    /// Every configured collection failed
    #[error("Retrieval failed: {0}")]
    Retrieval(String),

    #[error("Generation timed out after {0}s")]
    GenerationTimeout(u64),

    #[error("Generation backend unreachable: {0}")]
    GenerationConnection(String),

    /// Generation backend answered but with an unusable payload
    #[error("Generation error: {0}")]
    Generation(String),

    #[error("Structured output could not be parsed: {0}")]
    StructuredOutputParse(String),

    /// Content-safety rejection. The payload is a category, never user content.
    #[error("Request rejected by content policy: {0}")]
    GuardrailViolation(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Embedding error: {0}")]
    EmbeddingError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParsing(#[from] toml::de::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Custom(String),
}

impl RiksRagError {
    /// HTTP status code the API layer reports for this error
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::GuardrailViolation(_) => 400,
            Self::Retrieval(_) => 503,
            Self::GenerationTimeout(_) => 504,
            Self::GenerationConnection(_) => 502,
            Self::Cancelled => 499,
            _ => 500,
        }
    }

    /// Stable machine-readable code for API error bodies
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Retrieval(_) => "retrieval_error",
            Self::GenerationTimeout(_) => "generation_timeout",
            Self::GenerationConnection(_) => "generation_connection_error",
            Self::Generation(_) => "generation_error",
            Self::StructuredOutputParse(_) => "structured_output_error",
            Self::GuardrailViolation(_) => "guardrail_violation",
            Self::Cancelled => "cancelled",
            _ => "internal_error",
        }
    }

    /// Whether a retry with backoff may succeed
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::GenerationConnection(_) | Self::HttpError(_))
    }

    /// Message safe to show to API callers
    #[must_use]
    pub fn public_message(&self) -> String {
        match self {
            Self::GuardrailViolation(_) => {
                "The request was rejected by the content policy".to_string()
            }
            Self::Validation(msg) => msg.clone(),
            Self::Retrieval(_) => "No document collection could be reached".to_string(),
            Self::GenerationTimeout(_) => "The answer could not be generated in time".to_string(),
            Self::GenerationConnection(_) => "The generation backend is unavailable".to_string(),
            Self::Cancelled => "Request cancelled".to_string(),
            _ => "Internal server error".to_string(),
        }
    }
}

impl From<::config::ConfigError> for RiksRagError {
    fn from(err: ::config::ConfigError) -> Self {
        Self::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, RiksRagError>;
