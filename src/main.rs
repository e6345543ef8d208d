use clap::Parser;
use riksrag::cli::handle_ask;
use riksrag::cli::handle_config;
use riksrag::cli::handle_serve;
use riksrag::cli::AskOptions;
use riksrag::cli::Cli;
use riksrag::cli::Commands;
use riksrag::config::AppConfig;
use riksrag::logging;
use riksrag::Result;
use tracing::debug;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };

    match cli.command {
        Commands::Serve { host, port, cors } => {
            if cli.verbose {
                logging::init_logging_with_level("debug", &config.logging.log_dir)?;
            } else {
                logging::init_logging_with_config(&config.logging)?;
            }
            handle_serve(&config, host, port, cors).await?;
        }
        Commands::Ask {
            question,
            mode,
            strategy,
            k,
            stream,
            details,
        } => {
            // Keep stdout clean for the answer
            let level = if cli.verbose {
                tracing::Level::DEBUG
            } else {
                tracing::Level::WARN
            };
            logging::init_simple_logging(level)?;
            debug!("Using {} collections", config.vector_store.collections.len());
            let options = AskOptions {
                mode,
                strategy,
                k,
                stream,
                details,
            };
            handle_ask(config, question, options).await?;
        }
        Commands::Config => {
            handle_config(&config);
        }
    }

    Ok(())
}
