//! Storage backend abstraction for thread checkpoints
//!
//! [`CheckpointStore`] is the only shared mutable resource of the engine:
//! every thread reads and writes its own key, and different threads never
//! touch each other's entries. Backends must guarantee two things:
//!
//! - **Read-your-writes per key** - a `save` is visible to the next `load`
//!   of the same thread id.
//! - **Atomic compare-and-save** - [`CheckpointStore::compare_and_save`]
//!   checks the stored version and writes in one step, so a writer that
//!   lost a race (or whose thread was deleted underneath it) gets a
//!   [`CheckpointError::Conflict`](crate::CheckpointError::Conflict)
//!   instead of silently resurrecting stale state.
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use studyflow_checkpoint::{Checkpoint, CheckpointStore, Result};
//!
//! struct RedisStore { /* ... */ }
//!
//! #[async_trait]
//! impl<S> CheckpointStore<S> for RedisStore
//! where
//!     S: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
//! {
//!     async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>> {
//!         // GET checkpoint:{thread_id}
//!         todo!()
//!     }
//!     // WATCH/MULTI/EXEC for compare_and_save ...
//! #   async fn save(&self, c: Checkpoint<S>) -> Result<u64> { todo!() }
//! #   async fn compare_and_save(&self, c: Checkpoint<S>, e: Option<u64>) -> Result<u64> { todo!() }
//! #   async fn delete(&self, thread_id: &str) -> Result<bool> { todo!() }
//! #   async fn delete_if_version(&self, thread_id: &str, v: u64) -> Result<bool> { todo!() }
//! #   async fn list(&self) -> Result<Vec<String>> { todo!() }
//! }
//! ```

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Durable per-thread key-value store for [`Checkpoint`]s.
#[async_trait]
pub trait CheckpointStore<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// Load the checkpoint for `thread_id`, or `None` if the thread has none.
    async fn load(&self, thread_id: &str) -> Result<Option<Checkpoint<S>>>;

    /// Unconditionally store `checkpoint`, returning the version assigned.
    async fn save(&self, checkpoint: Checkpoint<S>) -> Result<u64>;

    /// Store `checkpoint` only if the currently stored version equals
    /// `expected` (`None` meaning "no checkpoint may exist yet").
    ///
    /// Returns the newly assigned version.
    async fn compare_and_save(&self, checkpoint: Checkpoint<S>, expected: Option<u64>)
        -> Result<u64>;

    /// Remove the checkpoint for `thread_id`.
    ///
    /// Returns `true` if something was removed. Deleting a missing thread is
    /// not an error.
    async fn delete(&self, thread_id: &str) -> Result<bool>;

    /// Remove the checkpoint only if its stored version equals `version`.
    ///
    /// Returns `true` if something was removed. A newer checkpoint written by
    /// someone else is left alone.
    async fn delete_if_version(&self, thread_id: &str, version: u64) -> Result<bool>;

    /// List thread ids that currently have a checkpoint (debugging aid).
    async fn list(&self) -> Result<Vec<String>>;
}
