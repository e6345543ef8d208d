//! HTTP API exposing the answering pipeline as JSON and SSE endpoints

pub mod handlers;
pub mod routes;
pub mod server;
pub mod types;

pub use server::build_router;
pub use server::serve_api;
