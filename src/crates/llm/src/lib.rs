//! HTTP completion backends for studyflow.
//!
//! Each client implements [`studyflow_core::CompletionService`], so the
//! executor can drive stages against a real model. Transport problems are
//! reported as [`LlmError`] and folded into the engine's
//! [`CompletionError`](studyflow_core::CompletionError) kinds: rate limits,
//! 5xx answers and unreachable servers become `Transient` (retried),
//! timeouts become `Timeout`, everything else is `Fatal`.
//!
//! # Local Providers
//!
//! - **Ollama** - `/api/chat`, schema via `format`, base64 images
//!
//! # Remote Providers
//!
//! - **OpenAI** (and compatible servers) - `/chat/completions`, schema via
//!   `response_format`, images as `image_url` parts

pub mod config;
pub mod error;
pub mod images;
pub mod provider_utils;

#[cfg(feature = "local")]
pub mod local;

#[cfg(feature = "remote")]
pub mod remote;

pub use config::{LocalLlmConfig, RemoteLlmConfig};
pub use error::{LlmError, Result};
pub use provider_utils::{ModelInfo, ProviderUtils};
