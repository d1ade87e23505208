//! Configuration management for studyflow
//!
//! Supports dual-location configuration:
//! - User-level: ~/.studyflow/studyflow.toml
//! - Project-level: ./.studyflow/studyflow.toml
//!
//! Project-level config overrides user-level config; an explicit
//! `--config` file overrides both.

mod loader;
mod schema;

pub use loader::ConfigLoader;
pub use schema::{
    expand_home, ArtifactSettings, EditSettings, ExecutionSettings, HitlSettings, LlmSettings,
    LoggingSettings, Provider, SnapshotFormat, StoreBackend, StoreSettings, StudyflowConfig,
};

use crate::Result;
use std::path::Path;

/// Load configuration from the standard locations, plus `explicit` if given.
pub async fn load_config(explicit: Option<&Path>) -> Result<StudyflowConfig> {
    let loader = match explicit {
        Some(path) => ConfigLoader::new().with_explicit(path),
        None => ConfigLoader::new(),
    };
    loader.load().await
}
