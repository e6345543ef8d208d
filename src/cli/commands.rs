//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;

use crate::models::RequestedMode;
use crate::models::Strategy;

#[derive(Parser)]
#[command(name = "riksrag")]
#[command(about = "Adaptive RAG over Swedish legal and government documents")]
#[command(version)]
pub struct Cli {
    /// Enable verbose debug logging (default: info level)
    #[arg(short, long)]
    pub verbose: bool,

    /// Path to a TOML config file (default: config.toml, then config.example.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Host to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides config)
        #[arg(short, long)]
        port: Option<u16>,
        /// Enable permissive CORS
        #[arg(long)]
        cors: bool,
    },
    /// Ask a single question from the command line
    Ask {
        /// The question to answer
        question: String,
        /// Response mode
        #[arg(short, long, value_enum, default_value = "auto")]
        mode: ModeArg,
        /// Retrieval strategy (default: from config)
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,
        /// Number of results to retrieve
        #[arg(short, long)]
        k: Option<usize>,
        /// Print tokens as they arrive
        #[arg(long)]
        stream: bool,
        /// Show retrieval and confidence details
        #[arg(long)]
        details: bool,
    },
    /// Show the effective configuration with secrets masked
    Config,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum ModeArg {
    Auto,
    Evidence,
    Assist,
    Chat,
}

impl From<ModeArg> for RequestedMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => Self::Auto,
            ModeArg::Evidence => Self::Evidence,
            ModeArg::Assist => Self::Assist,
            ModeArg::Chat => Self::Chat,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum StrategyArg {
    Parallel,
    Rewrite,
    Fusion,
    Adaptive,
}

impl From<StrategyArg> for Strategy {
    fn from(strategy: StrategyArg) -> Self {
        match strategy {
            StrategyArg::Parallel => Self::Parallel,
            StrategyArg::Rewrite => Self::Rewrite,
            StrategyArg::Fusion => Self::Fusion,
            StrategyArg::Adaptive => Self::Adaptive,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ask() {
        let cli = Cli::parse_from([
            "riksrag",
            "ask",
            "Vad säger PBL om bygglov?",
            "--mode",
            "assist",
            "--strategy",
            "fusion",
        ]);
        match cli.command {
            Commands::Ask {
                question,
                mode,
                strategy,
                stream,
                ..
            } => {
                assert_eq!(question, "Vad säger PBL om bygglov?");
                assert_eq!(RequestedMode::from(mode), RequestedMode::Assist);
                assert_eq!(strategy.map(Strategy::from), Some(Strategy::Fusion));
                assert!(!stream);
            }
            _ => panic!("expected ask"),
        }
    }

    #[test]
    fn test_parse_serve_with_global_config() {
        let cli = Cli::parse_from(["riksrag", "serve", "--port", "9000", "-c", "custom.toml"]);
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert!(matches!(
            cli.command,
            Commands::Serve {
                port: Some(9000),
                cors: false,
                ..
            }
        ));
    }
}
