//! Artifact export port
//!
//! When a thread reaches the end of the pipeline the executor pushes the
//! finished documents through an [`ArtifactSink`]. Failures are logged and
//! never retried; they do not block completion.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Artifact I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact rejected: {0}")]
    Rejected(String),
}

/// A named document produced by a finished thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub name: String,
    pub content: String,
}

impl Artifact {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait ArtifactSink: Send + Sync {
    async fn push(&self, thread_id: &str, name: &str, content: &str) -> Result<(), ArtifactError>;
}

/// Keeps pushed artifacts in memory, keyed by thread.
#[derive(Debug, Clone, Default)]
pub struct InMemoryArtifactSink {
    artifacts: Arc<RwLock<HashMap<String, Vec<Artifact>>>>,
}

impl InMemoryArtifactSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Artifacts pushed for `thread_id`, in push order.
    pub async fn get(&self, thread_id: &str) -> Vec<Artifact> {
        self.artifacts
            .read()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl ArtifactSink for InMemoryArtifactSink {
    async fn push(&self, thread_id: &str, name: &str, content: &str) -> Result<(), ArtifactError> {
        self.artifacts
            .write()
            .await
            .entry(thread_id.to_string())
            .or_default()
            .push(Artifact::new(name, content));
        Ok(())
    }
}
