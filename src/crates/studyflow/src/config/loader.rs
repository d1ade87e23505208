//! Configuration loader with dual-location support
//!
//! Loads configuration from:
//! 1. Default values
//! 2. User-level config: ~/.studyflow/studyflow.toml
//! 3. Project-level config: ./.studyflow/studyflow.toml
//! 4. An explicit `--config` file
//!
//! Later files override earlier ones key by key. String values may
//! reference the environment as `${VAR}` or `${VAR:default}`.

use crate::config::schema::StudyflowConfig;
use crate::error::{Result, StudyflowError};
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs;
use toml::Value;
use tracing::{debug, info};

/// Configuration loader that handles user, project and explicit configs
pub struct ConfigLoader {
    user_config_path: Option<PathBuf>,
    project_config_path: PathBuf,
    explicit_path: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            user_config_path: dirs::home_dir().map(|home| home.join(".studyflow").join("studyflow.toml")),
            project_config_path: PathBuf::from(".studyflow").join("studyflow.toml"),
            explicit_path: None,
        }
    }

    /// Also read `path`, which must exist, after the two standard locations.
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit_path = Some(path.into());
        self
    }

    pub fn user_config_path(&self) -> Option<&Path> {
        self.user_config_path.as_deref()
    }

    pub fn project_config_path(&self) -> &Path {
        &self.project_config_path
    }

    /// Load and merge every location, then validate.
    pub async fn load(&self) -> Result<StudyflowConfig> {
        let mut merged = Value::Table(Default::default());

        let optional = self
            .user_config_path
            .iter()
            .chain(std::iter::once(&self.project_config_path));
        for path in optional {
            match read_table(path).await? {
                Some(table) => {
                    debug!(path = %path.display(), "Loaded config file");
                    merge_values(&mut merged, table);
                }
                None => debug!(path = %path.display(), "Config file not found"),
            }
        }

        if let Some(path) = &self.explicit_path {
            let table = read_table(path).await?.ok_or_else(|| {
                StudyflowError::config(format!("Config file not found: {}", path.display()))
            })?;
            merge_values(&mut merged, table);
        }

        expand_env(&mut merged);
        let config: StudyflowConfig = merged
            .try_into()
            .map_err(|e| StudyflowError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;

        info!(provider = ?config.llm.provider, model = %config.llm.model, "Configuration loaded");
        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

async fn read_table(path: &Path) -> Result<Option<Value>> {
    let content = match fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(StudyflowError::config(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        }
    };
    let value: Value = toml::from_str(&content)
        .map_err(|e| StudyflowError::config(format!("Failed to parse {}: {}", path.display(), e)))?;
    Ok(Some(value))
}

/// Deep-merge `overlay` into `base`; tables merge, everything else replaces.
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Table(base), Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// Replace `${VAR}` / `${VAR:default}` in every string of the tree.
fn expand_env(value: &mut Value) {
    match value {
        Value::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        Value::Array(items) => items.iter_mut().for_each(expand_env),
        Value::Table(table) => table.iter_mut().for_each(|(_, v)| expand_env(v)),
        _ => {}
    }
}

/// An unset variable without a default is left as written.
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").ok()?;
    let expanded = re.replace_all(s, |caps: &regex::Captures<'_>| {
        match (std::env::var(&caps[1]), caps.get(2)) {
            (Ok(value), _) => value,
            (Err(_), Some(default)) => default.as_str().to_string(),
            (Err(_), None) => caps[0].to_string(),
        }
    });
    Some(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::Provider;
    use tempfile::TempDir;

    fn loader(dir: &TempDir) -> ConfigLoader {
        ConfigLoader {
            user_config_path: Some(dir.path().join("user.toml")),
            project_config_path: dir.path().join("project.toml"),
            explicit_path: None,
        }
    }

    #[tokio::test]
    async fn test_load_returns_defaults_when_no_files() {
        let dir = TempDir::new().unwrap();
        let config = loader(&dir).load().await.unwrap();
        assert_eq!(config, StudyflowConfig::default());
    }

    #[tokio::test]
    async fn test_project_overrides_user_key_by_key() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("user.toml"),
            r#"
[llm]
provider = "openai"
model = "gpt-4o"

[execution]
max_concurrency = 8
"#,
        )
        .await
        .unwrap();
        fs::write(
            dir.path().join("project.toml"),
            r#"
[llm]
model = "gpt-4o-mini"

[hitl]
explain = true
"#,
        )
        .await
        .unwrap();

        let config = loader(&dir).load().await.unwrap();
        assert_eq!(config.llm.provider, Provider::Openai);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.execution.max_concurrency, 8);
        assert!(config.hitl.explain);
        assert!(config.hitl.propose_questions);
    }

    #[tokio::test]
    async fn test_explicit_file_must_exist() {
        let dir = TempDir::new().unwrap();
        let err = loader(&dir)
            .with_explicit(dir.path().join("missing.toml"))
            .load()
            .await
            .unwrap_err();
        assert!(matches!(err, StudyflowError::Config(_)));
    }

    #[tokio::test]
    async fn test_explicit_file_wins() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("project.toml"), "[edit]\nthreshold = 0.9\n")
            .await
            .unwrap();
        let explicit = dir.path().join("ci.toml");
        fs::write(&explicit, "[edit]\nthreshold = 0.8\n").await.unwrap();

        let config = loader(&dir).with_explicit(&explicit).load().await.unwrap();
        assert_eq!(config.edit.threshold, 0.8);
    }

    #[tokio::test]
    async fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("project.toml"), "[execution]\nmax_concurrency = 0\n")
            .await
            .unwrap();
        assert!(loader(&dir).load().await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_toml_is_reported() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("user.toml"), "[llm\nmodel = ").await.unwrap();
        assert!(matches!(loader(&dir).load().await, Err(StudyflowError::Config(_))));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("STUDYFLOW_TEST_MODEL", "qwen2.5");
        std::env::remove_var("STUDYFLOW_TEST_UNSET");

        let expand = |s: &str| expand_env_in_string(s).unwrap();
        assert_eq!(expand("${STUDYFLOW_TEST_MODEL}"), "qwen2.5");
        assert_eq!(expand("${STUDYFLOW_TEST_UNSET:llama3.2}"), "llama3.2");
        assert_eq!(expand("${STUDYFLOW_TEST_UNSET}"), "${STUDYFLOW_TEST_UNSET}");
        assert_eq!(
            expand("http://${STUDYFLOW_TEST_UNSET:localhost}:11434"),
            "http://localhost:11434"
        );
        assert_eq!(expand_env_in_string("plain"), None);

        std::env::remove_var("STUDYFLOW_TEST_MODEL");
    }

    #[test]
    fn test_merge_replaces_scalars_and_merges_tables() {
        let mut base: Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: Value = toml::from_str("[a]\ny = 3\n[b]\nz = true\n").unwrap();
        merge_values(&mut base, overlay);

        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_bool(), Some(true));
    }
}
