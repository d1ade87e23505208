//! Error types for the HTTP completion backends.

use reqwest::StatusCode;
use studyflow_core::CompletionError;
use thiserror::Error;

/// Result type for backend operations.
pub type Result<T> = std::result::Result<T, LlmError>;

/// Errors that can occur while talking to a completion backend.
#[derive(Debug, Error)]
pub enum LlmError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Failed to serialize/deserialize data.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// API authentication failed.
    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    /// API key not found in environment.
    #[error("API key not found: {0}")]
    ApiKeyNotFound(String),

    /// Model not found or unavailable.
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Backend unavailable (e.g. Ollama not running, 5xx).
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Request rejected as malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Backend answered with something we cannot use.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Any other non-success answer.
    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Image could not be read or inlined.
    #[error("Image error: {0}")]
    ImageError(String),
}

impl LlmError {
    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::HttpError(err) => !err.is_builder() && !err.is_decode(),
            LlmError::ServiceUnavailable(_)
            | LlmError::Timeout(_)
            | LlmError::RateLimitExceeded(_) => true,
            _ => false,
        }
    }

    /// Check if this error is due to authentication.
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            LlmError::AuthenticationError(_) | LlmError::ApiKeyNotFound(_)
        )
    }

    /// Classify a non-success HTTP answer.
    pub fn from_status(provider: &str, status: StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => LlmError::AuthenticationError(body),
            404 => LlmError::ModelNotFound(body),
            408 => LlmError::Timeout(body),
            429 => LlmError::RateLimitExceeded(body),
            400 | 422 => LlmError::InvalidRequest(body),
            code if code >= 500 => {
                LlmError::ServiceUnavailable(format!("{} API error {}: {}", provider, status, body))
            }
            _ => LlmError::ProviderError(format!("{} API error {}: {}", provider, status, body)),
        }
    }

    /// Map a transport error, separating timeouts from other failures.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout(err.to_string())
        } else {
            LlmError::HttpError(err)
        }
    }
}

impl From<serde_json::Error> for LlmError {
    fn from(err: serde_json::Error) -> Self {
        LlmError::SerializationError(err.to_string())
    }
}

impl From<LlmError> for CompletionError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Timeout(msg) => CompletionError::Timeout(msg),
            LlmError::HttpError(ref inner) if inner.is_timeout() => {
                CompletionError::Timeout(err.to_string())
            }
            LlmError::InvalidResponse(msg) | LlmError::SerializationError(msg) => {
                CompletionError::InvalidResponse(msg)
            }
            err if err.is_retryable() => CompletionError::Transient(err.to_string()),
            err => CompletionError::Fatal(err.to_string()),
        }
    }
}
