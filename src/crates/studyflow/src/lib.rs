//! # studyflow
//!
//! Guided study sessions on top of [`studyflow_core`]: a question (and
//! optional photos of notes) is explained, follow-up questions are proposed
//! for review and answered in parallel, and the results are synthesized
//! into a study document that can be edited before it is published.
//!
//! ```text
//! StudyService ──▶ Executor ──▶ stages ──▶ CompletionService (Ollama / OpenAI)
//!                     │
//!                     ├──▶ CheckpointStore (memory / file)
//!                     └──▶ FileArtifactSink
//! ```
//!
//! Configuration is read from `~/.studyflow/studyflow.toml` and
//! `./.studyflow/studyflow.toml`; see [`config`].

pub mod backend;
pub mod config;
pub mod error;
pub mod logging;
pub mod prompts;
pub mod service;
pub mod sink;
pub mod stages;

pub use backend::{build_backend, Backend};
pub use config::{load_config, StudyflowConfig};
pub use error::{Result, StudyflowError};
pub use service::StudyService;
pub use sink::FileArtifactSink;
pub use stages::{build_pipeline, PipelineOptions};

/// Version string for `--version` style output.
pub fn version_info() -> String {
    format!("studyflow {}", env!("CARGO_PKG_VERSION"))
}
