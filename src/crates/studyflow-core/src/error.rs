//! Error types for the execution engine
//!
//! ```text
//! EngineError
//! ├── InvalidThread      - empty first submission, resume without checkpoint
//! ├── StageFailed        - a stage gave up (completion failed after retries)
//! ├── UnknownStage       - routing named a stage that is not registered
//! ├── IllegalTransition  - routing used an undeclared edge
//! ├── Validation         - registry wiring errors found at build time
//! ├── ThreadDeleted      - thread vanished mid-run (compare-and-save conflict)
//! ├── RecursionLimit     - too many stage transitions in one call
//! └── Checkpoint         - store failures
//!
//! StageError             - returned by stage implementations
//! ├── Completion         - completion port failure (already retried)
//! └── InvalidResponse    - completion output did not fit the stage
//! ```
//!
//! Recoverable edit failures ([`EditError`](crate::fuzzy::EditError)) never
//! surface here; feedback cycles turn them into human-facing messages.
//! Fan-out worker failures stay in-band as accumulator entries.

use crate::completion::CompletionError;
use studyflow_checkpoint::CheckpointError;
use thiserror::Error;

/// Convenience result type using [`EngineError`]
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors returned by [`Executor`](crate::Executor) operations.
#[derive(Error, Debug)]
pub enum EngineError {
    /// The request cannot be served for this thread; nothing was mutated
    #[error("Invalid thread '{thread_id}': {reason}")]
    InvalidThread { thread_id: String, reason: String },

    /// A stage failed; the last good checkpoint is untouched
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: StageError,
    },

    #[error("Unknown stage '{0}'")]
    UnknownStage(String),

    /// A stage routed along an edge that was never declared
    #[error("Illegal transition from '{from}' to '{to}'")]
    IllegalTransition { from: String, to: String },

    /// Registry validation failed
    #[error("Pipeline validation failed: {0}")]
    Validation(String),

    /// The thread was deleted while a run was in flight
    #[error("Thread '{0}' was deleted during execution")]
    ThreadDeleted(String),

    /// Routing exceeded the per-call transition budget
    #[error("Recursion limit of {limit} stage transitions reached")]
    RecursionLimit { limit: usize },

    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),
}

impl EngineError {
    pub fn invalid_thread(thread_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidThread {
            thread_id: thread_id.into(),
            reason: reason.into(),
        }
    }

    pub fn stage_failed(stage: impl Into<String>, source: StageError) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source,
        }
    }
}

/// Error produced inside a stage.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Completion(#[from] CompletionError),

    #[error("Invalid completion response: {0}")]
    InvalidResponse(String),
}

impl StageError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }
}

impl From<serde_json::Error> for StageError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::invalid_thread("t-1", "empty input");
        assert_eq!(err.to_string(), "Invalid thread 't-1': empty input");

        let err = EngineError::stage_failed(
            "explain",
            StageError::Completion(CompletionError::Transient("503".into())),
        );
        assert!(err.to_string().starts_with("Stage 'explain' failed"));
    }

    #[test]
    fn test_checkpoint_error_converts() {
        let err: EngineError = CheckpointError::NotFound("t".into()).into();
        assert!(matches!(err, EngineError::Checkpoint(_)));
    }
}
