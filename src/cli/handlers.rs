//! CLI command handlers

use std::io::Write;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::commands::ModeArg;
use crate::cli::commands::StrategyArg;
use crate::cli::output::*;
use crate::errors::RiksRagError;
use crate::rag::Orchestrator;
use crate::rag::QueryRequest;
use crate::rag::StreamEvent;
use crate::AppConfig;
use crate::Result;

/// Handle `serve`
pub async fn handle_serve(
    config: &AppConfig,
    host: Option<String>,
    port: Option<u16>,
    cors: bool,
) -> Result<()> {
    use crate::api::serve_api;

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let cors = cors || config.server.enable_cors;

    println!("🚀 Starting RiksRAG API Server");
    println!("==============================\n");
    println!("📍 Host: {host}");
    println!("🔌 Port: {port}");
    println!("🌐 CORS: {}", if cors { "Enabled" } else { "Disabled" });
    println!();

    serve_api(config, host, port, cors).await
}

/// Options for `ask`
pub struct AskOptions {
    pub mode: ModeArg,
    pub strategy: Option<StrategyArg>,
    pub k: Option<usize>,
    pub stream: bool,
    pub details: bool,
}

/// Handle `ask`
pub async fn handle_ask(config: AppConfig, question: String, options: AskOptions) -> Result<()> {
    let orchestrator = Arc::new(Orchestrator::from_config(config)?);

    let mut request = QueryRequest::new(question).with_mode(options.mode.into());
    if let Some(strategy) = options.strategy {
        request = request.with_strategy(strategy.into());
    }
    request.k = options.k;

    if options.stream {
        ask_streaming(&orchestrator, request, options.details).await
    } else {
        let answer = orchestrator.process_query(request).await?;
        print_answer(&answer, options.details);
        Ok(())
    }
}

async fn ask_streaming(
    orchestrator: &Arc<Orchestrator>,
    request: QueryRequest,
    details: bool,
) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let mut events = orchestrator.stream_query(request, cancel.clone());
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Metadata(metadata) => {
                debug!(request_id = %metadata.request_id, "Stream started");
            }
            StreamEvent::Token(token) => {
                print!("{token}");
                stdout.flush()?;
            }
            StreamEvent::Done(answer) => {
                println!();
                println!();
                print_answer_footer(&answer, details);
                return Ok(());
            }
            StreamEvent::Error { code, message } => {
                println!();
                print_error(&format!("{message} ({code})"));
                return Err(RiksRagError::Custom(message));
            }
        }
    }

    if cancel.is_cancelled() {
        print_warning("Cancelled");
    }
    Ok(())
}

/// Handle `config`
pub fn handle_config(config: &AppConfig) {
    print_config(config);
    if let Err(e) = config.validate() {
        print_error(&format!("Configuration is invalid: {e}"));
    } else {
        print_success("Configuration is valid");
    }
}
