//! Hosted completion APIs.
//!
//! These need an API key, read from the environment variable named in
//! the `llm.api_key_env` setting.

pub mod openai;

pub use openai::OpenAiClient;
