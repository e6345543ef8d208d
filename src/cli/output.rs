//! CLI output formatting utilities
//!
//! This module provides consistent output formatting for the `riksrag` CLI

use crate::models::Answer;
use crate::models::EvidenceLevel;
use crate::AppConfig;

/// Safely truncate a string at character boundary (not byte boundary)
///
/// Swedish text is full of multi-byte characters (å, ä, ö, §), so slicing by
/// byte index would panic.
///
/// # Returns
/// Truncated string with "..." suffix if truncated, otherwise the original string
#[must_use]
pub fn truncate_str(s: &str, max_chars: usize) -> String {
    if s.chars().count() > max_chars {
        let truncated: String = s.chars().take(max_chars).collect();
        format!("{truncated}...")
    } else {
        s.to_string()
    }
}

const fn evidence_label(level: EvidenceLevel) -> &'static str {
    match level {
        EvidenceLevel::High => "HIGH",
        EvidenceLevel::Medium => "MEDIUM",
        EvidenceLevel::Low => "LOW",
        EvidenceLevel::None => "NONE",
    }
}

/// Print an answer with its sources
pub fn print_answer(answer: &Answer, details: bool) {
    println!("{}", answer.answer);
    println!();
    print_answer_footer(answer, details);
}

/// Print everything after the answer text
pub fn print_answer_footer(answer: &Answer, details: bool) {
    if answer.saknas_underlag {
        print_warning("Saknas underlag: the sources do not support an answer");
    }

    if !answer.sources.is_empty() {
        println!("📚 Sources ({}):", answer.sources.len());
        for (i, source) in answer.sources.iter().enumerate() {
            let sfs = source
                .sfs_number
                .as_deref()
                .map(|n| format!(" [SFS {n}]"))
                .unwrap_or_default();
            println!(
                "  {}. {}{} | {} | score {:.3}",
                i + 1,
                truncate_str(&source.title, 80),
                sfs,
                source.collection,
                source.score
            );
        }
        println!();
    }

    println!(
        "Mode: {} | Evidence: {}",
        answer.mode,
        evidence_label(answer.evidence_level)
    );

    if details {
        let meta = &answer.metadata;
        println!();
        println!("🔎 Details:");
        println!("  Request: {}", meta.request_id);
        if let Some(strategy) = meta.strategy {
            println!("  Strategy: {strategy}");
        }
        if let Some(step) = meta.escalation_step {
            println!("  Escalation step: {step}");
        }
        if let Some(confidence) = &meta.confidence {
            println!(
                "  Confidence: {:.3} ({:?})",
                confidence.composite_score, confidence.decision
            );
            for (name, value) in &confidence.signals {
                println!("    {name}: {value:.3}");
            }
        }
        println!(
            "  Loops: retrieval {} | critique {}",
            meta.retrieval_loops, meta.critique_loops
        );
        if !meta.degraded_collections.is_empty() {
            println!("  Degraded: {}", meta.degraded_collections.join(", "));
        }
        if let Some(reason) = &meta.fallback_reason {
            println!("  Fallback: {reason}");
        }
        println!("  Elapsed: {}ms", meta.elapsed_ms);
    }
}

/// Print configuration
pub fn print_config(config: &AppConfig) {
    let config = config.masked();
    println!("📋 RiksRAG Configuration:");
    println!();

    println!("🌐 Server:");
    println!("  Address: {}:{}", config.server.host, config.server.port);
    println!("  CORS: {}", config.server.enable_cors);
    println!();

    println!("📝 Logging:");
    println!("  Level: {}", config.logging.level);
    println!("  Directory: {}", config.logging.log_dir);
    println!();

    println!("🧠 Embeddings:");
    println!("  Endpoint: {}", config.embeddings.endpoint);
    println!("  Model: {}", config.embeddings.model);
    println!();

    println!("🗂️  Vector store:");
    println!("  Endpoint: {}", config.vector_store.endpoint);
    println!("  Collections: {}", config.vector_store.collections.join(", "));
    println!(
        "  Statute collections: {}",
        config.vector_store.statute_collections.join(", ")
    );
    println!();

    println!("🔍 Retrieval:");
    println!("  Strategy: {}", config.retrieval.default_strategy);
    println!("  k: {}", config.retrieval.default_k);
    println!("  RRF k: {}", config.retrieval.rrf_k);
    println!(
        "  Confidence thresholds: {} / {}",
        config.confidence.low_threshold, config.confidence.high_threshold
    );
    println!(
        "  Loops: retrieval {} | critique {}",
        config.flow.max_retrieval_loops, config.flow.max_critique_loops
    );
    println!("  Reranker: {}", config.reranker.enabled);
    println!();

    println!("🤖 LLM:");
    println!("  Endpoint: {}", config.llm_endpoint());
    println!("  Model: {}", config.llm_model());
    println!("  Grader model: {}", config.llm.grader_model());
    println!(
        "  Key: {}",
        config.llm.api_key.as_deref().unwrap_or("(not set)")
    );
}

/// Print colored output functions
pub fn print_success(msg: &str) {
    println!("✅ {msg}");
}

pub fn print_warning(msg: &str) {
    println!("⚠️  {msg}");
}

pub fn print_error(msg: &str) {
    eprintln!("❌ {msg}");
}
