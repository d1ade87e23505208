//! Configuration schema for studyflow

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use studyflow_core::{ExecutorConfig, RetryPolicy, DEFAULT_THRESHOLD};

use crate::error::{Result, StudyflowError};

/// Main studyflow configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StudyflowConfig {
    pub llm: LlmSettings,
    pub store: StoreSettings,
    pub artifacts: ArtifactSettings,
    pub execution: ExecutionSettings,
    pub hitl: HitlSettings,
    pub edit: EditSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Ollama,
    Openai,
}

/// Completion backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    pub provider: Provider,

    pub model: String,

    /// Defaults to the provider's public endpoint
    pub base_url: Option<String>,

    /// Environment variable holding the API key (remote providers only)
    pub api_key_env: String,

    pub organization: Option<String>,

    /// Per-request HTTP timeout
    pub timeout_secs: u64,

    pub temperature: Option<f32>,
}

impl LlmSettings {
    pub fn base_url(&self) -> &str {
        match (&self.base_url, self.provider) {
            (Some(url), _) => url,
            (None, Provider::Ollama) => "http://localhost:11434",
            (None, Provider::Openai) => "https://api.openai.com/v1",
        }
    }
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "llama3.2-vision".to_string(),
            base_url: None,
            api_key_env: "OPENAI_API_KEY".to_string(),
            organization: None,
            timeout_secs: 120,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Threads are lost on exit
    Memory,
    /// One snapshot file per thread
    File,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    Json,
    Bincode,
}

/// Checkpoint store configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,

    /// Directory for the file backend; `~/` expands to the home directory
    pub path: String,

    pub format: SnapshotFormat,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::File,
            path: "~/.studyflow/threads".to_string(),
            format: SnapshotFormat::Json,
        }
    }
}

/// Where finished study documents are written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactSettings {
    pub dir: String,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            dir: "~/.studyflow/artifacts".to_string(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionSettings {
    /// Maximum follow-up questions answered in parallel
    pub max_concurrency: usize,

    /// Maximum stage runs per submission
    pub recursion_limit: usize,

    /// Upper bound on proposed follow-up questions
    pub max_questions: usize,

    /// Backoff for transient completion failures
    pub retry: RetryPolicy,
}

impl ExecutionSettings {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            recursion_limit: self.recursion_limit,
            max_concurrency: self.max_concurrency,
            retry: self.retry.clone(),
        }
    }
}

impl Default for ExecutionSettings {
    fn default() -> Self {
        let defaults = ExecutorConfig::default();
        Self {
            max_concurrency: defaults.max_concurrency,
            recursion_limit: defaults.recursion_limit,
            max_questions: 5,
            retry: defaults.retry,
        }
    }
}

/// Per-stage human review defaults
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitlSettings {
    pub explain: bool,
    pub propose_questions: bool,
    pub edit_document: bool,
}

impl Default for HitlSettings {
    fn default() -> Self {
        Self {
            explain: false,
            propose_questions: true,
            edit_document: false,
        }
    }
}

/// Fuzzy edit configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditSettings {
    /// Minimum similarity for an approximate match
    pub threshold: f64,
}

impl Default for EditSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, e.g. `info` or `studyflow_core=debug`
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl StudyflowConfig {
    /// Reject values the engine cannot work with.
    pub fn validate(&self) -> Result<()> {
        if !(self.edit.threshold > 0.0 && self.edit.threshold <= 1.0) {
            return Err(StudyflowError::config(format!(
                "edit.threshold must be in (0, 1], got {}",
                self.edit.threshold
            )));
        }
        if self.execution.max_concurrency == 0 {
            return Err(StudyflowError::config("execution.max_concurrency must be at least 1"));
        }
        if self.execution.recursion_limit == 0 {
            return Err(StudyflowError::config("execution.recursion_limit must be at least 1"));
        }
        if self.execution.retry.max_attempts == 0 {
            return Err(StudyflowError::config("execution.retry.max_attempts must be at least 1"));
        }
        if self.llm.model.trim().is_empty() {
            return Err(StudyflowError::config("llm.model must not be empty"));
        }
        Ok(())
    }

    pub fn store_path(&self) -> PathBuf {
        expand_home(&self.store.path)
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        expand_home(&self.artifacts.dir)
    }
}

/// Expand a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StudyflowConfig::default();
        assert_eq!(config.llm.provider, Provider::Ollama);
        assert_eq!(config.llm.base_url(), "http://localhost:11434");
        assert_eq!(config.store.backend, StoreBackend::File);
        assert_eq!(config.execution.max_concurrency, 4);
        assert_eq!(config.execution.retry.max_attempts, 3);
        assert!(config.hitl.propose_questions);
        assert!(!config.hitl.explain);
        assert_eq!(config.edit.threshold, 0.85);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let toml = r#"
            [llm]
            provider = "openai"
            model = "gpt-4o"

            [execution.retry]
            max_attempts = 5
        "#;

        let config: StudyflowConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.llm.provider, Provider::Openai);
        assert_eq!(config.llm.base_url(), "https://api.openai.com/v1");
        assert_eq!(config.llm.timeout_secs, 120);
        assert_eq!(config.execution.retry.max_attempts, 5);
        assert_eq!(config.execution.max_questions, 5);
    }

    #[test]
    fn test_store_format_parses() {
        let config: StudyflowConfig = toml::from_str(
            r#"
            [store]
            backend = "memory"
            format = "bincode"
        "#,
        )
        .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.format, SnapshotFormat::Bincode);
    }

    #[test]
    fn test_threshold_out_of_range_is_rejected() {
        let mut config = StudyflowConfig::default();
        config.edit.threshold = 1.5;
        assert!(matches!(config.validate(), Err(StudyflowError::Config(_))));

        config.edit.threshold = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_concurrency_is_rejected() {
        let mut config = StudyflowConfig::default();
        config.execution.max_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/tmp/threads"), PathBuf::from("/tmp/threads"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.studyflow/threads"), home.join(".studyflow/threads"));
        }
    }
}
