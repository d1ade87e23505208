//! Stages, fan-out workers, and the pipeline registry
//!
//! A pipeline is a set of named [`Stage`]s joined by declared edges, plus
//! the [`FanOutWorker`]s that fan-out stages dispatch to. Stages are plain
//! trait objects looked up by name; the executor keeps no per-stage state
//! between calls, everything durable lives in the checkpoint.
//!
//! ```text
//!            ┌───────────┐  Goto      ┌───────────┐
//!  entry ──▶ │  stage A  │ ─────────▶ │  stage B  │ ──▶ ... ──▶ __end__
//!            └───────────┘            └─────┬─────┘
//!                                           │ FanOut { worker, units, then }
//!                              ┌────────────┼────────────┐
//!                              ▼            ▼            ▼
//!                          worker(u1)   worker(u2)   worker(uK)
//!                              └────────────┼────────────┘
//!                                           ▼ merged, then Goto `then`
//! ```
//!
//! # Building a pipeline
//!
//! ```rust
//! use async_trait::async_trait;
//! use studyflow_core::{
//!     ExecutionState, HumanInput, PipelineBuilder, Stage, StageContext, StageError,
//!     StageOutcome, StateUpdate, END,
//! };
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Stage for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     async fn run(
//!         &self,
//!         _ctx: &StageContext,
//!         state: &ExecutionState,
//!         _input: Option<HumanInput>,
//!     ) -> Result<StageOutcome, StageError> {
//!         Ok(StageOutcome::goto(END, StateUpdate::new().with_explanation(state.question.clone())))
//!     }
//! }
//!
//! let mut pipeline = PipelineBuilder::new();
//! pipeline.add_stage(Echo).set_entry("echo").add_finish("echo");
//! let registry = pipeline.compile().unwrap();
//! assert_eq!(registry.entry(), "echo");
//! ```

use crate::completion::{CompletionError, CompletionRequest, CompletionResponse, CompletionService};
use crate::error::{EngineError, Result, StageError};
use crate::retry::{retry_transient, RetryPolicy};
use crate::session::{EditAudit, SessionSlot};
use crate::state::{ExecutionState, StateUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use studyflow_checkpoint::CyclePhase;

/// Reserved name of the terminal pseudo-stage.
pub const END: &str = "__end__";

/// Structured human reply to a suspended stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum HumanInput {
    /// Accept the current proposal as is
    Approve,
    /// Accept the stage's "skipped" outcome
    Skip,
    /// Free-text feedback asking for a revision
    Revise(String),
}

impl HumanInput {
    /// Map a chat message to a signal. Only a whole-message `approve` or
    /// `skip` (trimmed, any case) is a signal; anything else is feedback.
    pub fn from_text(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("approve") {
            HumanInput::Approve
        } else if trimmed.eq_ignore_ascii_case("skip") {
            HumanInput::Skip
        } else {
            HumanInput::Revise(text.to_string())
        }
    }
}

/// One sub-execution of a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FanOutUnit {
    /// Identifies the unit in logs and error reports
    pub key: String,
    pub payload: Value,
}

impl FanOutUnit {
    pub fn new(key: impl Into<String>, payload: Value) -> Self {
        Self {
            key: key.into(),
            payload,
        }
    }
}

/// Request to run `worker` once per unit, then continue at `then`.
#[derive(Debug, Clone, PartialEq)]
pub struct FanOutRequest {
    pub worker: String,
    pub units: Vec<FanOutUnit>,
    pub then: String,
}

/// What a stage asks the executor to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutcome {
    /// Apply `update` and continue at `next` (or finish at [`END`])
    Goto { next: String, update: StateUpdate },

    /// Apply `update`, persist, and return `messages` to the human
    Suspend {
        update: StateUpdate,
        messages: Vec<String>,
        phase: CyclePhase,
    },

    /// Apply `update`, run the fan-out, merge its results, continue at `then`
    FanOut {
        update: StateUpdate,
        request: FanOutRequest,
    },
}

impl StageOutcome {
    pub fn goto(next: impl Into<String>, update: StateUpdate) -> Self {
        StageOutcome::Goto {
            next: next.into(),
            update,
        }
    }

    pub fn suspend(update: StateUpdate, messages: Vec<String>) -> Self {
        StageOutcome::Suspend {
            update,
            messages,
            phase: CyclePhase::AwaitingFeedback,
        }
    }
}

/// Per-call handle given to stages and workers.
#[derive(Clone)]
pub struct StageContext {
    pub thread_id: String,
    pub session_id: String,
    completion: Arc<dyn CompletionService>,
    retry: RetryPolicy,
    slot: Arc<SessionSlot>,
}

impl StageContext {
    pub fn new(
        thread_id: impl Into<String>,
        session_id: impl Into<String>,
        completion: Arc<dyn CompletionService>,
        retry: RetryPolicy,
        slot: Arc<SessionSlot>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            session_id: session_id.into(),
            completion,
            retry,
            slot,
        }
    }

    /// Call the completion backend, retrying transient failures.
    pub async fn complete(&self, request: CompletionRequest) -> std::result::Result<CompletionResponse, CompletionError> {
        let label = format!("{}:{}", self.thread_id, request.purpose);
        let response = retry_transient(&self.retry, &label, || self.completion.generate(request.clone())).await?;
        if let Some(schema) = &request.schema {
            response.check_schema(schema)?;
        }
        Ok(response)
    }

    /// Set once the thread has been deleted.
    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    pub fn record_edit(&self, audit: EditAudit) {
        self.slot.record_edit(audit);
    }
}

/// A named pipeline step.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Human-readable description shown by state queries.
    fn label(&self) -> &str {
        self.name()
    }

    /// Run the stage. `input` is `Some` only when resuming a suspension of
    /// this stage.
    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        input: Option<HumanInput>,
    ) -> std::result::Result<StageOutcome, StageError>;
}

/// Body of one fan-out sub-execution.
#[async_trait]
pub trait FanOutWorker: Send + Sync {
    fn name(&self) -> &str;

    /// Process one unit against a snapshot of the state.
    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        unit: &FanOutUnit,
    ) -> std::result::Result<StateUpdate, StageError>;

    /// Turn a failed unit into an in-band result.
    fn on_error(&self, unit: &FanOutUnit, error: &str) -> StateUpdate;
}

/// Builds a [`StageRegistry`].
#[derive(Default)]
pub struct PipelineBuilder {
    entry: Option<String>,
    stages: HashMap<String, Arc<dyn Stage>>,
    workers: HashMap<String, Arc<dyn FanOutWorker>>,
    edges: HashMap<String, BTreeSet<String>>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stage(&mut self, stage: impl Stage + 'static) -> &mut Self {
        self.stages.insert(stage.name().to_string(), Arc::new(stage));
        self
    }

    pub fn add_worker(&mut self, worker: impl FanOutWorker + 'static) -> &mut Self {
        self.workers.insert(worker.name().to_string(), Arc::new(worker));
        self
    }

    /// Declare that `from` may route to `to`.
    pub fn add_edge(&mut self, from: impl Into<String>, to: impl Into<String>) -> &mut Self {
        self.edges.entry(from.into()).or_default().insert(to.into());
        self
    }

    /// Declare that `from` may finish the pipeline.
    pub fn add_finish(&mut self, from: impl Into<String>) -> &mut Self {
        self.add_edge(from, END)
    }

    pub fn set_entry(&mut self, stage: impl Into<String>) -> &mut Self {
        self.entry = Some(stage.into());
        self
    }

    /// Validate wiring and freeze the pipeline.
    pub fn compile(self) -> Result<StageRegistry> {
        let entry = self
            .entry
            .ok_or_else(|| EngineError::Validation("no entry stage set".to_string()))?;
        if !self.stages.contains_key(&entry) {
            return Err(EngineError::Validation(format!("entry stage '{}' does not exist", entry)));
        }
        for name in self.workers.keys() {
            if self.stages.contains_key(name) || name == END {
                return Err(EngineError::Validation(format!(
                    "worker '{}' clashes with a stage name",
                    name
                )));
            }
        }
        for (from, targets) in &self.edges {
            if !self.stages.contains_key(from) {
                return Err(EngineError::Validation(format!("edge source '{}' does not exist", from)));
            }
            for to in targets {
                if to != END && !self.stages.contains_key(to) {
                    return Err(EngineError::Validation(format!("edge target '{}' does not exist", to)));
                }
            }
        }

        Ok(StageRegistry {
            entry,
            stages: self.stages,
            workers: self.workers,
            edges: self.edges,
        })
    }
}

/// Immutable name → stage map with the declared edges.
pub struct StageRegistry {
    entry: String,
    stages: HashMap<String, Arc<dyn Stage>>,
    workers: HashMap<String, Arc<dyn FanOutWorker>>,
    edges: HashMap<String, BTreeSet<String>>,
}

impl StageRegistry {
    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn stage(&self, name: &str) -> Result<Arc<dyn Stage>> {
        self.stages
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStage(name.to_string()))
    }

    pub fn worker(&self, name: &str) -> Result<Arc<dyn FanOutWorker>> {
        self.workers
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownStage(name.to_string()))
    }

    /// Fail unless `from → to` was declared.
    pub fn check_transition(&self, from: &str, to: &str) -> Result<()> {
        let declared = self.edges.get(from).is_some_and(|targets| targets.contains(to));
        if declared {
            Ok(())
        } else {
            Err(EngineError::IllegalTransition {
                from: from.to_string(),
                to: to.to_string(),
            })
        }
    }

    /// Label of `name`, falling back to the name itself.
    pub fn label(&self, name: &str) -> String {
        match self.stages.get(name) {
            Some(stage) => stage.label().to_string(),
            None if name == END => "Finished".to_string(),
            None => name.to_string(),
        }
    }

    pub fn stage_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
