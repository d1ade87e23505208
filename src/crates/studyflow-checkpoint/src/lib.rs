//! # studyflow-checkpoint - Durable Thread State
//!
//! **Per-thread checkpoint storage** for the studyflow execution engine. A
//! checkpoint is written after every stage the engine completes, so a crash
//! never replays a finished stage and a suspended thread can wait on a human
//! for as long as it takes.
//!
//! ## Core Concepts
//!
//! ### 1. Checkpoint
//!
//! A [`Checkpoint`] holds the thread id, the session correlation id, an
//! execution state snapshot (generic `S`), and an optional [`Suspension`]
//! naming the stage that yielded plus the messages it surfaced. The cycle
//! marker [`CyclePhase`] travels with the suspension so resumption is a
//! plain re-entry, not a revived coroutine.
//!
//! ### 2. CheckpointStore Trait
//!
//! [`CheckpointStore`] is the storage port:
//!
//! - **`load()`** - latest checkpoint of a thread
//! - **`save()`** - unconditional write
//! - **`compare_and_save()`** - atomic per-key read-modify-write guarded by version
//! - **`delete()`** - idempotent removal
//! - **`list()`** - thread ids, for debugging
//!
//! ### 3. Backends
//!
//! - [`InMemoryCheckpointStore`] - `Arc<RwLock<HashMap>>`, for tests and demos
//! - [`FileCheckpointStore`] - one file per thread, atomic rename on write,
//!   JSON or bincode encoding via [`SerializerProtocol`]
//!
//! ## Quick Start
//!
//! ```rust
//! use studyflow_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore, Suspension};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryCheckpointStore::new();
//!
//! let checkpoint = Checkpoint::new("thread-1", "session-1", vec!["draft".to_string()])
//!     .with_suspension(Some(Suspension::new("review", vec!["Approve?".into()])));
//! let version = store.compare_and_save(checkpoint, None).await?;
//!
//! let loaded = store.load("thread-1").await?.expect("just saved");
//! assert_eq!(loaded.version, version);
//! assert_eq!(loaded.suspended_stage(), Some("review"));
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
pub mod error;
pub mod file;
pub mod memory;
pub mod serializer;
pub mod traits;

pub use checkpoint::{Checkpoint, CyclePhase, Suspension};
pub use error::{CheckpointError, Result};
pub use file::FileCheckpointStore;
pub use memory::InMemoryCheckpointStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use traits::CheckpointStore;
