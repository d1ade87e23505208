//! Writes finished documents to `<dir>/<thread>/<name>`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use studyflow_core::{ArtifactError, ArtifactSink};
use tokio::fs;
use tracing::info;

/// [`ArtifactSink`] backed by a directory tree.
#[derive(Debug, Clone)]
pub struct FileArtifactSink {
    root: PathBuf,
}

impl FileArtifactSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding a thread's artifacts.
    pub fn thread_dir(&self, thread_id: &str) -> Result<PathBuf, ArtifactError> {
        Ok(self.root.join(safe_component(thread_id)?))
    }
}

/// Map an id onto a single, harmless path component.
fn safe_component(raw: &str) -> Result<String, ArtifactError> {
    let cleaned: String = raw
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        return Err(ArtifactError::Rejected(format!("unusable path component {:?}", raw)));
    }
    Ok(cleaned)
}

#[async_trait]
impl ArtifactSink for FileArtifactSink {
    async fn push(&self, thread_id: &str, name: &str, content: &str) -> Result<(), ArtifactError> {
        let dir = self.thread_dir(thread_id)?;
        fs::create_dir_all(&dir).await?;

        let path = dir.join(safe_component(name)?);
        fs::write(&path, content).await?;
        info!(thread_id = %thread_id, path = %path.display(), "Artifact saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_push_writes_under_thread_dir() {
        let dir = TempDir::new().unwrap();
        let sink = FileArtifactSink::new(dir.path());

        sink.push("thread-1", "document.md", "# Notes").await.unwrap();

        let written = std::fs::read_to_string(dir.path().join("thread-1").join("document.md")).unwrap();
        assert_eq!(written, "# Notes");
    }

    #[tokio::test]
    async fn test_path_traversal_is_neutralized() {
        let dir = TempDir::new().unwrap();
        let sink = FileArtifactSink::new(dir.path());

        sink.push("../../etc", "passwd", "x").await.unwrap();
        assert!(dir.path().join(".._.._etc").join("passwd").exists());

        assert!(matches!(
            sink.push("..", "x.md", "x").await,
            Err(ArtifactError::Rejected(_))
        ));
    }
}
