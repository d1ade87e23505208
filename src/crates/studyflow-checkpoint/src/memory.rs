//! In-memory checkpoint storage for development and testing
//!
//! [`InMemoryCheckpointStore`] keeps the latest checkpoint of every thread in
//! an `Arc<RwLock<HashMap>>`. Clones share the same map, so a store handed to
//! an executor can be inspected from a test.
//!
//! Data is lost on restart; use [`FileCheckpointStore`](crate::FileCheckpointStore)
//! when threads must survive the process.

use crate::{
    checkpoint::Checkpoint,
    error::{CheckpointError, Result},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Thread-safe in-memory checkpoint storage
type CheckpointMap<S> = Arc<RwLock<HashMap<String, Checkpoint<S>>>>;

/// In-memory checkpoint store
///
/// # Example
///
/// ```rust
/// use studyflow_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemoryCheckpointStore::<String>::new();
///     let version = store
///         .compare_and_save(Checkpoint::new("t1", "s1", "hello".to_string()), None)
///         .await?;
///     assert_eq!(version, 1);
///     Ok(())
/// }
/// ```
#[derive(Debug)]
pub struct InMemoryCheckpointStore<S> {
    storage: CheckpointMap<S>,
}

impl<S> Clone for InMemoryCheckpointStore<S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
        }
    }
}

impl<S> InMemoryCheckpointStore<S> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of threads with a checkpoint
    pub async fn thread_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Clear all checkpoints (useful for testing)
    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl<S> Default for InMemoryCheckpointStore<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S> CheckpointStore<S> for InMemoryCheckpointStore<S>
where
    S: Clone + Send + Sync + 'static,
{
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>> {
        Ok(self.storage.read().await.get(thread_id).cloned())
    }

    async fn save(&self, mut checkpoint: Checkpoint<S>) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let version = storage
            .get(&checkpoint.thread_id)
            .map(|existing| existing.version)
            .unwrap_or(0)
            + 1;

        checkpoint.version = version;
        checkpoint.updated_at = Utc::now();
        storage.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(version)
    }

    async fn compare_and_save(
        &self,
        mut checkpoint: Checkpoint<S>,
        expected: Option<u64>,
    ) -> Result<u64> {
        let mut storage = self.storage.write().await;
        let found = storage.get(&checkpoint.thread_id).map(|c| c.version);

        if found != expected {
            return Err(CheckpointError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                expected,
                found,
            });
        }

        let version = found.unwrap_or(0) + 1;
        checkpoint.version = version;
        checkpoint.updated_at = Utc::now();
        storage.insert(checkpoint.thread_id.clone(), checkpoint);
        Ok(version)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        Ok(self.storage.write().await.remove(thread_id).is_some())
    }

    async fn delete_if_version(&self, thread_id: &str, version: u64) -> Result<bool> {
        let mut storage = self.storage.write().await;
        if storage.get(thread_id).map(|c| c.version) != Some(version) {
            return Ok(false);
        }
        Ok(storage.remove(thread_id).is_some())
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self.storage.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
