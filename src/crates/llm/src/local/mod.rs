//! Completion servers on localhost or the local network.
//!
//! No API key; the server must be running before the first request.

pub mod ollama;

pub use ollama::OllamaClient;
