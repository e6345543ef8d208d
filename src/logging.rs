//! Logging configuration for RiksRAG

use std::path::Path;

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::{self};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Registry;

use crate::config::LoggingConfig;
use crate::Result;

/// Initialize logging with configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    init_logging_with_level(&config.level, &config.log_dir)
}

/// Initialize logging with custom log level, writing to stderr and to a daily
/// rolling file under `log_dir`
pub fn init_logging_with_level(level: &str, log_dir: &str) -> Result<()> {
    let logs_dir = Path::new(log_dir);
    if !logs_dir.exists() {
        std::fs::create_dir_all(logs_dir)?;
    }

    // RUST_LOG wins over the configured level when set
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},riksrag={level}")));

    let file_appender = tracing_appender::rolling::daily(logs_dir, "riksrag.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(std::io::stderr);

    let file_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_writer(non_blocking)
        .with_ansi(false);

    Registry::default()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| crate::RiksRagError::ConfigError(format!("logging already set up: {e}")))?;

    tracing::info!("Logging initialized with level: {level}");
    tracing::info!("Log files will be saved to: {log_dir}/riksrag.log.YYYY-MM-DD");

    // The writer thread must outlive every subscriber call
    std::mem::forget(guard);

    Ok(())
}

/// Initialize simple stderr logging for tests and one-shot CLI runs
pub fn init_simple_logging(level: tracing::Level) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|e| crate::RiksRagError::ConfigError(format!("logging already set up: {e}")))?;
    Ok(())
}
