//! Text-completion port
//!
//! Stages talk to the language model only through [`CompletionService`].
//! Implementations live outside the engine (the `llm` crate provides HTTP
//! clients); tests script responses keyed by [`CompletionRequest::purpose`].
//!
//! A request may carry a JSON schema. Backends that support structured
//! output pass it through; the response's [`CompletionResponse::parse`]
//! decodes the text either way, tolerating a surrounding code fence.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::state::ImageRef;

/// Errors surfaced by a completion backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompletionError {
    /// Temporary failure (rate limit, 5xx, connection reset); retried
    #[error("Transient completion failure: {0}")]
    Transient(String),

    /// Backend did not answer in time; retried
    #[error("Completion timed out: {0}")]
    Timeout(String),

    /// Permanent failure (auth, bad request); not retried
    #[error("Completion failed: {0}")]
    Fatal(String),

    /// Backend answered but the payload was unusable
    #[error("Invalid completion response: {0}")]
    InvalidResponse(String),
}

impl CompletionError {
    /// Whether the retry policy should try again.
    pub fn is_transient(&self) -> bool {
        matches!(self, CompletionError::Transient(_) | CompletionError::Timeout(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a completion prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<ImageRef>,
}

impl PromptMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }
}

/// A completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub messages: Vec<PromptMessage>,

    /// JSON schema the response must satisfy, if structured output is wanted
    pub schema: Option<Value>,

    /// Short tag naming the calling step (e.g. `explain.proposal`); used for
    /// tracing and by scripted test backends
    pub purpose: String,
}

impl CompletionRequest {
    pub fn new(purpose: impl Into<String>, messages: Vec<PromptMessage>) -> Self {
        Self {
            messages,
            schema: None,
            purpose: purpose.into(),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

/// A completion result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub text: String,

    /// Backend-decoded structured output, when the backend offers it
    pub structured: Option<Value>,
}

impl CompletionResponse {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            structured: None,
        }
    }

    pub fn structured(value: Value) -> Self {
        Self {
            text: value.to_string(),
            structured: Some(value),
        }
    }

    /// Decode the response as `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, CompletionError> {
        if let Some(value) = &self.structured {
            return serde_json::from_value(value.clone())
                .map_err(|e| CompletionError::InvalidResponse(e.to_string()));
        }
        serde_json::from_str(strip_code_fence(&self.text))
            .map_err(|e| CompletionError::InvalidResponse(e.to_string()))
    }
}

impl CompletionResponse {
    /// Check the decoded payload against `schema`.
    ///
    /// Only enforced with the `json-validation` feature; otherwise a
    /// mismatch surfaces later, when the payload is parsed.
    #[cfg(feature = "json-validation")]
    pub fn check_schema(&self, schema: &Value) -> Result<(), CompletionError> {
        use jsonschema::JSONSchema;

        let value = match &self.structured {
            Some(value) => value.clone(),
            None => match serde_json::from_str::<Value>(strip_code_fence(&self.text)) {
                Ok(value) => value,
                Err(_) => return Ok(()),
            },
        };

        let compiled = JSONSchema::compile(schema)
            .map_err(|e| CompletionError::Fatal(format!("Invalid JSON Schema: {}", e)))?;

        let messages = match compiled.validate(&value) {
            Ok(()) => None,
            Err(errors) => Some(
                errors
                    .map(|e| format!("{}: {}", e.instance_path, e))
                    .collect::<Vec<String>>(),
            ),
        };

        match messages {
            Some(messages) => Err(CompletionError::InvalidResponse(messages.join("; "))),
            None => Ok(()),
        }
    }

    #[cfg(not(feature = "json-validation"))]
    pub fn check_schema(&self, _schema: &Value) -> Result<(), CompletionError> {
        Ok(())
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Text-completion backend.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, CompletionError>;
}
