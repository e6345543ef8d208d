use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::models::Strategy;
use crate::RiksRagError;

/// Hard ceiling for both flow loop counters
pub const MAX_LOOP_BOUND: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8900,
            enable_cors: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub backtrace: bool,
    pub log_dir: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            backtrace: true,
            log_dir: "logs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingsConfig {
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    /// `openai` or `ollama`
    pub provider: String,
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434".to_string(),
            model: "bge-m3".to_string(),
            api_key: None,
            provider: "ollama".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorStoreConfig {
    pub endpoint: String,
    /// Ordered target collections. The first one is the SFS-priority collection.
    pub collections: Vec<String>,
    /// Collections whose documents count as statutory text
    pub statute_collections: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000".to_string(),
            collections: vec![
                "sfs_lagtext".to_string(),
                "riksdag_documents".to_string(),
                "myndighet_vagledning".to_string(),
            ],
            statute_collections: vec!["sfs_lagtext".to_string()],
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Smaller model used for relevance grading; falls back to `model`
    pub grader_model: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:11434/v1".to_string(),
            api_key: None,
            model: "ministral-3:14b".to_string(),
            grader_model: None,
            timeout_secs: 60,
            max_retries: 2,
            backoff_base_ms: 250,
            backoff_max_ms: 4000,
        }
    }
}

impl LlmConfig {
    pub fn grader_model(&self) -> &str {
        self.grader_model.as_deref().unwrap_or(&self.model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankerConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "http://localhost:8001".to_string(),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub default_k: usize,
    pub rrf_k: f32,
    pub escalation_k_multiplier: usize,
    pub fusion_variants: usize,
    pub default_strategy: Strategy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_k: 10,
            rrf_k: 60.0,
            escalation_k_multiplier: 3,
            fusion_variants: 3,
            default_strategy: Strategy::Adaptive,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceConfig {
    /// Signal name to weight. Signals missing from the map do not contribute.
    pub weights: BTreeMap<String, f32>,
    pub low_threshold: f32,
    pub high_threshold: f32,
}

impl Default for ConfidenceConfig {
    fn default() -> Self {
        let weights = [
            ("top1_score", 0.25),
            ("score_spread", 0.10),
            ("agreement_across_queries", 0.15),
            ("sfs_priority_hit", 0.15),
            ("result_count", 0.10),
            ("mean_top3", 0.10),
            ("query_term_coverage", 0.15),
        ]
        .into_iter()
        .map(|(name, weight)| (name.to_string(), weight))
        .collect();

        Self {
            weights,
            low_threshold: 0.35,
            high_threshold: 0.65,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub enabled: bool,
    pub max_concurrency: usize,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrency: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub max_retrieval_loops: u32,
    pub max_critique_loops: u32,
    pub critique_enabled: bool,
    pub max_context_chars: usize,
    pub max_question_chars: usize,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            max_retrieval_loops: MAX_LOOP_BOUND,
            max_critique_loops: MAX_LOOP_BOUND,
            critique_enabled: true,
            max_context_chars: 12_000,
            max_question_chars: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeParams {
    pub temperature: f32,
    pub max_tokens: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModesConfig {
    pub evidence: ModeParams,
    pub assist: ModeParams,
    pub chat: ModeParams,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            evidence: ModeParams {
                temperature: 0.1,
                max_tokens: 1500,
            },
            assist: ModeParams {
                temperature: 0.4,
                max_tokens: 2000,
            },
            chat: ModeParams {
                temperature: 0.7,
                max_tokens: 600,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    pub keep_alive_secs: u64,
    /// Characters per token event when replaying an approved answer
    pub replay_chunk_chars: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            keep_alive_secs: 15,
            replay_chunk_chars: 24,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub embeddings: EmbeddingsConfig,
    pub vector_store: VectorStoreConfig,
    pub llm: LlmConfig,
    pub reranker: RerankerConfig,
    pub retrieval: RetrievalConfig,
    pub confidence: ConfidenceConfig,
    pub grading: GradingConfig,
    pub flow: FlowConfig,
    pub modes: ModesConfig,
    pub streaming: StreamingConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from the default file path, layered with
    /// `RIKSRAG__SECTION__KEY` environment overrides
    pub fn load() -> crate::Result<Self> {
        let path = if Path::new("config.toml").exists() {
            "config.toml"
        } else if Path::new("config.example.toml").exists() {
            tracing::warn!(
                "Using config.example.toml. Please create config.toml for production use."
            );
            "config.example.toml"
        } else {
            tracing::warn!("No config file found, using built-in defaults");
            return Self::load_layered(None);
        };
        Self::load_layered(Some(Path::new(path)))
    }

    /// Load from an explicit path, still honouring environment overrides
    pub fn load_from<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(RiksRagError::ConfigError(format!(
                "Config file not found: {}",
                path.display()
            )));
        }
        Self::load_layered(Some(path))
    }

    fn load_layered(path: Option<&Path>) -> crate::Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                ::config::Environment::with_prefix("RIKSRAG")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("vector_store.collections")
                    .with_list_parse_key("vector_store.statute_collections")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the pipeline cannot run safely with
    pub fn validate(&self) -> crate::Result<()> {
        if self.vector_store.collections.is_empty() {
            return Err(RiksRagError::ConfigError(
                "vector_store.collections must not be empty".to_string(),
            ));
        }
        let c = &self.confidence;
        if !(0.0..=1.0).contains(&c.low_threshold) || !(0.0..=1.0).contains(&c.high_threshold) {
            return Err(RiksRagError::ConfigError(
                "confidence thresholds must lie in [0, 1]".to_string(),
            ));
        }
        if c.low_threshold > c.high_threshold {
            return Err(RiksRagError::ConfigError(format!(
                "confidence.low_threshold ({}) exceeds high_threshold ({})",
                c.low_threshold, c.high_threshold
            )));
        }
        if let Some((name, weight)) = c.weights.iter().find(|(_, w)| **w < 0.0 || !w.is_finite())
        {
            return Err(RiksRagError::ConfigError(format!(
                "confidence weight '{name}' is invalid: {weight}"
            )));
        }
        if self.grading.max_concurrency == 0 {
            return Err(RiksRagError::ConfigError(
                "grading.max_concurrency must be at least 1".to_string(),
            ));
        }
        for (name, bound) in [
            ("flow.max_retrieval_loops", self.flow.max_retrieval_loops),
            ("flow.max_critique_loops", self.flow.max_critique_loops),
        ] {
            if bound == 0 || bound > MAX_LOOP_BOUND {
                return Err(RiksRagError::ConfigError(format!(
                    "{name} must be between 1 and {MAX_LOOP_BOUND}, got {bound}"
                )));
            }
        }
        if self.retrieval.default_k == 0 {
            return Err(RiksRagError::ConfigError(
                "retrieval.default_k must be at least 1".to_string(),
            ));
        }
        if self.retrieval.rrf_k < 0.0 {
            return Err(RiksRagError::ConfigError(
                "retrieval.rrf_k must not be negative".to_string(),
            ));
        }
        if self.retrieval.fusion_variants == 0 || self.retrieval.fusion_variants > 3 {
            return Err(RiksRagError::ConfigError(
                "retrieval.fusion_variants must be between 1 and 3".to_string(),
            ));
        }
        Ok(())
    }

    /// Copy of this configuration with secrets blanked out, for display
    #[must_use]
    pub fn masked(&self) -> Self {
        let mut copy = self.clone();
        let mask = |key: &mut Option<String>| {
            if key.is_some() {
                *key = Some("****".to_string());
            }
        };
        mask(&mut copy.llm.api_key);
        mask(&mut copy.embeddings.api_key);
        copy
    }

    /// Get the SFS-priority collection (first configured collection)
    pub fn priority_collection(&self) -> Option<&str> {
        self.vector_store.collections.first().map(String::as_str)
    }

    /// Get LLM endpoint
    pub fn llm_endpoint(&self) -> &str {
        &self.llm.endpoint
    }

    /// Get LLM model
    pub fn llm_model(&self) -> &str {
        &self.llm.model
    }
}
