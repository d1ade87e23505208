//! File-backed checkpoint storage
//!
//! One file per thread under a root directory. Ids up to
//! [`MAX_ENCODED_ID_BYTES`] are stored under the hex encoding of the id, so
//! `list()` recovers them from the name alone. Longer ids are stored under
//! `sha256-<digest>` to stay within file name limits; `list()` reads the id
//! back from the checkpoint itself. Writes go to a temporary file that is
//! renamed over the target, which keeps the previous checkpoint intact if
//! the process dies mid-write.
//!
//! Compare-and-save is made atomic with a per-thread async mutex; threads
//! never contend with each other. A thread's mutex is dropped again once
//! its checkpoint is gone and nobody else is waiting on it.

use crate::{
    checkpoint::Checkpoint,
    error::{CheckpointError, Result},
    serializer::{JsonSerializer, SerializerProtocol},
    traits::CheckpointStore,
};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// Longest thread id (in bytes) stored under its hex encoding.
pub const MAX_ENCODED_ID_BYTES: usize = 100;

const HASHED_PREFIX: &str = "sha256-";

/// Checkpoint store persisting one file per thread.
pub struct FileCheckpointStore<S, Ser = JsonSerializer> {
    root: PathBuf,
    serializer: Ser,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    _state: PhantomData<fn() -> S>,
}

impl<S> FileCheckpointStore<S, JsonSerializer> {
    /// Open (creating if needed) a JSON-encoded store rooted at `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self> {
        Self::with_serializer(root, JsonSerializer::new()).await
    }
}

impl<S, Ser> FileCheckpointStore<S, Ser>
where
    Ser: SerializerProtocol,
{
    /// Open a store with an explicit snapshot encoding.
    pub async fn with_serializer(root: impl AsRef<Path>, serializer: Ser) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self {
            root,
            serializer,
            locks: Mutex::new(HashMap::new()),
            _state: PhantomData,
        })
    }

    /// Directory holding the checkpoint files
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, thread_id: &str) -> PathBuf {
        self.root
            .join(format!("{}.{}", file_stem(thread_id), self.serializer.extension()))
    }

    fn lock_for(&self, thread_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(thread_id.to_string()).or_default())
    }

    /// Forget the mutex of a thread without a checkpoint, unless another
    /// caller still holds a handle to it.
    fn release_lock(&self, thread_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock();
        if locks.get(thread_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(thread_id);
        }
    }

    /// Number of per-thread mutexes currently held in memory.
    pub fn lock_count(&self) -> usize {
        self.locks.lock().len()
    }

    async fn read(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>>
    where
        S: DeserializeOwned,
    {
        self.read_path(&self.path_for(thread_id)).await
    }

    async fn read_path(&self, path: &Path) -> Result<Option<Checkpoint<S>>>
    where
        S: DeserializeOwned,
    {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(self.serializer.loads(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, thread_id: &str) -> Result<bool> {
        match fs::remove_file(self.path_for(thread_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, checkpoint: &Checkpoint<S>) -> Result<()>
    where
        S: Serialize,
    {
        let target = self.path_for(&checkpoint.thread_id);
        let tmp = target.with_extension("tmp");
        let bytes = self.serializer.dumps(checkpoint)?;

        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        debug!(
            thread_id = %checkpoint.thread_id,
            version = checkpoint.version,
            path = %target.display(),
            "Checkpoint written"
        );
        Ok(())
    }
}

#[async_trait]
impl<S, Ser> CheckpointStore<S> for FileCheckpointStore<S, Ser>
where
    S: Serialize + DeserializeOwned + Send + Sync + 'static,
    Ser: SerializerProtocol + 'static,
{
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>> {
        let lock = self.lock_for(thread_id);
        let loaded = {
            let _guard = lock.lock().await;
            self.read(thread_id).await
        };
        if matches!(loaded, Ok(None)) {
            self.release_lock(thread_id, lock);
        }
        loaded
    }

    async fn save(&self, mut checkpoint: Checkpoint<S>) -> Result<u64> {
        let lock = self.lock_for(&checkpoint.thread_id);
        let _guard = lock.lock().await;

        let current = self.read(&checkpoint.thread_id).await?.map(|c| c.version);
        checkpoint.version = current.unwrap_or(0) + 1;
        checkpoint.updated_at = Utc::now();
        self.write(&checkpoint).await?;
        Ok(checkpoint.version)
    }

    async fn compare_and_save(
        &self,
        mut checkpoint: Checkpoint<S>,
        expected: Option<u64>,
    ) -> Result<u64> {
        let lock = self.lock_for(&checkpoint.thread_id);
        let _guard = lock.lock().await;

        let found = self.read(&checkpoint.thread_id).await?.map(|c| c.version);
        if found != expected {
            return Err(CheckpointError::Conflict {
                thread_id: checkpoint.thread_id.clone(),
                expected,
                found,
            });
        }

        checkpoint.version = found.unwrap_or(0) + 1;
        checkpoint.updated_at = Utc::now();
        self.write(&checkpoint).await?;
        Ok(checkpoint.version)
    }

    async fn delete(&self, thread_id: &str) -> Result<bool> {
        let lock = self.lock_for(thread_id);
        let removed = {
            let _guard = lock.lock().await;
            self.remove(thread_id).await
        };
        self.release_lock(thread_id, lock);
        removed
    }

    async fn delete_if_version(&self, thread_id: &str, version: u64) -> Result<bool> {
        let lock = self.lock_for(thread_id);
        let removed = {
            let _guard = lock.lock().await;
            match self.read(thread_id).await? {
                Some(current) if current.version == version => self.remove(thread_id).await?,
                _ => false,
            }
        };
        if removed {
            self.release_lock(thread_id, lock);
        }
        Ok(removed)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let suffix = format!(".{}", self.serializer.extension());
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(&suffix) else { continue };
            if let Some(id) = decode_id(stem) {
                ids.push(id);
                continue;
            }
            if !stem.starts_with(HASHED_PREFIX) {
                debug!(file = %name, "Skipping unrecognised checkpoint file");
                continue;
            }
            match self.read_path(&entry.path()).await {
                Ok(Some(checkpoint)) => ids.push(checkpoint.thread_id),
                Ok(None) => {}
                Err(err) => warn!(file = %name, error = %err, "Skipping unreadable checkpoint file"),
            }
        }

        ids.sort();
        Ok(ids)
    }
}

fn file_stem(thread_id: &str) -> String {
    if thread_id.len() <= MAX_ENCODED_ID_BYTES {
        return encode_id(thread_id);
    }
    let mut hasher = Sha256::new();
    hasher.update(thread_id.as_bytes());
    format!("{}{:x}", HASHED_PREFIX, hasher.finalize())
}

fn encode_id(thread_id: &str) -> String {
    thread_id.bytes().map(|b| format!("{:02x}", b)).collect()
}

fn decode_id(stem: &str) -> Option<String> {
    if stem.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..stem.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(stem.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::Suspension;
    use crate::serializer::BincodeSerializer;

    #[test]
    fn test_id_encoding_round_trips() {
        for id in ["thread-1", "a/b\\c", "ünïcode", ""] {
            assert_eq!(decode_id(&encode_id(id)).as_deref(), Some(id));
        }
        assert_eq!(decode_id("abc"), None);
        assert_eq!(decode_id("zz"), None);
    }

    #[tokio::test]
    async fn test_long_thread_id_is_hashed() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::<u32>::open(dir.path()).await.unwrap();
        let long_id = "x".repeat(130);
        let longer_id = "y".repeat(4000);

        store.compare_and_save(Checkpoint::new(long_id.as_str(), "s", 1), None).await.unwrap();
        store.compare_and_save(Checkpoint::new(longer_id.as_str(), "s", 2), None).await.unwrap();
        store.compare_and_save(Checkpoint::new("short", "s", 3), None).await.unwrap();

        assert_eq!(store.load(&long_id).await.unwrap().unwrap().state, 1);
        assert_eq!(store.load(&longer_id).await.unwrap().unwrap().state, 2);

        let mut expected = vec![long_id.clone(), "short".to_string(), longer_id.clone()];
        expected.sort();
        assert_eq!(store.list().await.unwrap(), expected);

        assert!(store.delete(&long_id).await.unwrap());
        assert!(store.load(&long_id).await.unwrap().is_none());
        assert_eq!(store.list().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_deleted_threads_release_their_locks() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::<u32>::open(dir.path()).await.unwrap();

        for i in 0..20 {
            let id = format!("t{i}");
            store.compare_and_save(Checkpoint::new(id.as_str(), "s", i), None).await.unwrap();
            store.delete(&id).await.unwrap();
        }
        for i in 0..20 {
            assert!(store.load(&format!("missing-{i}")).await.unwrap().is_none());
        }
        assert_eq!(store.lock_count(), 0);

        store.compare_and_save(Checkpoint::new("kept", "s", 1), None).await.unwrap();
        assert_eq!(store.lock_count(), 1);
    }

    #[tokio::test]
    async fn test_delete_if_version_spares_newer_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::<u32>::open(dir.path()).await.unwrap();

        let v1 = store.compare_and_save(Checkpoint::new("t", "s", 1), None).await.unwrap();
        let v2 = store.compare_and_save(Checkpoint::new("t", "s", 2), Some(v1)).await.unwrap();

        assert!(!store.delete_if_version("t", v1).await.unwrap());
        assert_eq!(store.load("t").await.unwrap().unwrap().state, 2);
        assert!(store.delete_if_version("t", v2).await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_checkpoint_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();

        {
            let store = FileCheckpointStore::<Vec<String>>::open(dir.path()).await.unwrap();
            let checkpoint = Checkpoint::new("thread/1", "session-1", vec!["q".to_string()])
                .with_suspension(Some(Suspension::new("review", vec!["hi".to_string()])));
            store.compare_and_save(checkpoint, None).await.unwrap();
        }

        let reopened = FileCheckpointStore::<Vec<String>>::open(dir.path()).await.unwrap();
        let loaded = reopened.load("thread/1").await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.state, vec!["q".to_string()]);
        assert_eq!(loaded.suspended_stage(), Some("review"));
        assert_eq!(reopened.list().await.unwrap(), vec!["thread/1"]);
    }

    #[tokio::test]
    async fn test_bincode_store_conflicts_and_deletes() {
        let dir = tempfile::tempdir().unwrap();
        let store =
            FileCheckpointStore::<u32, _>::with_serializer(dir.path(), BincodeSerializer::new())
                .await
                .unwrap();

        let v1 = store
            .compare_and_save(Checkpoint::new("t", "s", 1), None)
            .await
            .unwrap();
        let err = store
            .compare_and_save(Checkpoint::new("t", "s", 2), None)
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        store
            .compare_and_save(Checkpoint::new("t", "s", 3), Some(v1))
            .await
            .unwrap();
        assert_eq!(store.load("t").await.unwrap().unwrap().state, 3);

        assert!(store.delete("t").await.unwrap());
        assert!(!store.delete("t").await.unwrap());
        assert!(store.list().await.unwrap().is_empty());
    }
}
