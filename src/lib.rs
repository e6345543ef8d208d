pub mod api;
pub mod cli;
pub mod clients;
pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod models;
pub mod rag;

#[cfg(test)]
mod config_tests;

pub use config::AppConfig;
pub use errors::*;
