//! Connection settings for the completion backends.

use crate::error::{LlmError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings for a local Ollama server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    /// Server base URL, e.g. `http://localhost:11434`.
    pub base_url: String,

    pub model: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Sampling temperature; backend default when unset.
    #[serde(default)]
    pub temperature: Option<f32>,
}

impl LocalLlmConfig {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: trim_base(base_url.into()),
            model: model.into(),
            timeout: default_timeout(),
            temperature: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// Settings for an OpenAI-compatible remote API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteLlmConfig {
    pub api_key: String,

    /// API base URL including the version segment, e.g.
    /// `https://api.openai.com/v1`.
    pub base_url: String,

    pub model: String,

    /// Per-request HTTP timeout.
    #[serde(default = "default_timeout")]
    pub timeout: Duration,

    /// Sent as `OpenAI-Organization` when set.
    pub organization: Option<String>,

    #[serde(default)]
    pub temperature: Option<f32>,
}

impl RemoteLlmConfig {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: trim_base(base_url.into()),
            model: model.into(),
            timeout: default_timeout(),
            organization: None,
            temperature: None,
        }
    }

    /// Read the API key from `env_var`.
    pub fn from_env(
        env_var: &str,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Result<Self> {
        let api_key = std::env::var(env_var)
            .map_err(|_| LlmError::ApiKeyNotFound(format!("Environment variable: {}", env_var)))?;

        Ok(Self::new(api_key, base_url, model))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_organization(mut self, organization: impl Into<String>) -> Self {
        self.organization = Some(organization.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

fn trim_base(url: String) -> String {
    url.trim_end_matches('/').to_string()
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_config_builder() {
        let config = LocalLlmConfig::new("http://localhost:11434/", "llama3.2-vision")
            .with_timeout(Duration::from_secs(30))
            .with_temperature(0.2);

        assert_eq!(config.base_url, "http://localhost:11434");
        assert_eq!(config.model, "llama3.2-vision");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.temperature, Some(0.2));
    }

    #[test]
    fn test_remote_config_builder() {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4o")
            .with_timeout(Duration::from_secs(120))
            .with_organization("org-123");

        assert_eq!(config.api_key, "test-key");
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.timeout, Duration::from_secs(120));
        assert_eq!(config.organization, Some("org-123".to_string()));
        assert_eq!(config.temperature, None);
    }

    #[test]
    fn test_missing_api_key() {
        let err = RemoteLlmConfig::from_env(
            "STUDYFLOW_TEST_KEY_THAT_IS_NOT_SET",
            "https://api.openai.com/v1",
            "gpt-4o",
        )
        .unwrap_err();
        assert!(err.is_auth_error());
    }
}
