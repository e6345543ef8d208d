//! Unit tests for configuration module
//!
//! These tests validate configuration parsing, defaults, and validation.

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::config::*;
    use crate::models::Strategy;
    use crate::RiksRagError;

    fn write_toml(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // ====== Default Value Tests ======

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.retrieval.default_strategy, Strategy::Adaptive);
        assert_eq!(config.flow.max_retrieval_loops, 3);
        assert_eq!(config.flow.max_critique_loops, 3);
        assert!((config.confidence.low_threshold - 0.35).abs() < f32::EPSILON);
        assert!((config.confidence.high_threshold - 0.65).abs() < f32::EPSILON);
    }

    #[test]
    fn test_priority_collection_is_first() {
        let config = AppConfig::default();
        assert_eq!(config.priority_collection(), Some("sfs_lagtext"));
    }

    #[test]
    fn test_default_weights_sum_to_one() {
        let total: f32 = ConfidenceConfig::default().weights.values().sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_grader_model_falls_back() {
        let mut llm = LlmConfig::default();
        assert_eq!(llm.grader_model(), llm.model);
        llm.grader_model = Some("small".to_string());
        assert_eq!(llm.grader_model(), "small");
    }

    // ====== File Loading Tests ======

    #[test]
    fn test_from_file_partial_sections() {
        let file = write_toml(
            r#"
[vector_store]
collections = ["a", "b"]

[retrieval]
default_strategy = "fusion"
default_k = 5
"#,
        );
        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.vector_store.collections, vec!["a", "b"]);
        assert_eq!(config.retrieval.default_strategy, Strategy::Fusion);
        assert_eq!(config.retrieval.default_k, 5);
        // Untouched sections keep their defaults
        assert_eq!(config.server.port, 8900);
    }

    #[test]
    fn test_load_from_layers_file() {
        let file = write_toml(
            r#"
[flow]
max_critique_loops = 2

[confidence]
low_threshold = 0.2
high_threshold = 0.8
"#,
        );
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.flow.max_critique_loops, 2);
        assert!((config.confidence.high_threshold - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_load_from_missing_file() {
        let result = AppConfig::load_from("/nonexistent/riksrag.toml");
        assert!(matches!(result, Err(RiksRagError::ConfigError(_))));
    }

    #[test]
    fn test_invalid_toml_is_rejected() {
        let file = write_toml("[retrieval\ndefault_k = ");
        assert!(AppConfig::from_file(file.path()).is_err());
    }

    // ====== Validation Tests ======

    #[test]
    fn test_rejects_empty_collections() {
        let mut config = AppConfig::default();
        config.vector_store.collections.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_thresholds() {
        let mut config = AppConfig::default();
        config.confidence.low_threshold = 0.7;
        config.confidence.high_threshold = 0.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_loop_bounds_above_three() {
        let mut config = AppConfig::default();
        config.flow.max_retrieval_loops = 4;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.flow.max_critique_loops = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_negative_weight() {
        let mut config = AppConfig::default();
        config
            .confidence
            .weights
            .insert("top1_score".to_string(), -0.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_masked_hides_keys() {
        let mut config = AppConfig::default();
        config.llm.api_key = Some("sk-secret".to_string());
        let masked = config.masked();
        assert_eq!(masked.llm.api_key.as_deref(), Some("****"));
        assert!(masked.embeddings.api_key.is_none());
    }
}
