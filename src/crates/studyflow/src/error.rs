//! Error types for studyflow
//!
//! Wraps the engine, backend and store errors into one application error.

use llm::LlmError;
use studyflow_checkpoint::CheckpointError;
use studyflow_core::EngineError;
use thiserror::Error;

/// Result type alias for studyflow operations
pub type Result<T> = std::result::Result<T, StudyflowError>;

#[derive(Error, Debug)]
pub enum StudyflowError {
    /// Configuration could not be read, parsed, or is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    /// Completion backend could not be set up
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Checkpoint store error: {0}")]
    Store(#[from] CheckpointError),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StudyflowError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
