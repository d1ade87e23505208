//! # studyflow-core - Durable Stage Execution
//!
//! **A resumable execution engine** that drives a fixed pipeline of stages
//! per thread, checkpoints after every stage, suspends indefinitely for
//! human feedback, and resumes exactly where it left off.
//!
//! ## Core Concepts
//!
//! ### 1. State
//!
//! [`ExecutionState`] is the versioned record of a thread. Stages return a
//! [`StateUpdate`]; scalar fields overwrite, the Q&A accumulator only ever
//! appends.
//!
//! ### 2. Stages
//!
//! A [`Stage`] returns a [`StageOutcome`]:
//!
//! - **`Goto`** - continue at the next stage (or [`END`])
//! - **`Suspend`** - persist and hand messages to the human
//! - **`FanOut`** - run a [`FanOutWorker`] once per unit, in parallel, then continue
//!
//! Stages and workers are registered by name through a [`PipelineBuilder`]
//! which validates the declared edges.
//!
//! ### 3. Feedback cycles
//!
//! [`FeedbackCycle`] wraps a [`FeedbackStage`] into a propose → feedback →
//! revise → finalize loop. Human replies are structured as [`HumanInput`].
//!
//! ### 4. Executor
//!
//! [`Executor`] loads the checkpoint, runs stages, compare-and-saves after
//! each, and on completion pushes artifacts through an [`ArtifactSink`]
//! before deleting the thread.
//!
//! ## Ports
//!
//! | Port | Purpose |
//! |------|---------|
//! | [`CompletionService`] | text completion with optional JSON schema |
//! | [`CheckpointStore`](studyflow_checkpoint::CheckpointStore) | durable thread snapshots |
//! | [`ArtifactSink`] | finished documents |
//!
//! ## Quick Start
//!
//! ```rust
//! use async_trait::async_trait;
//! use std::sync::Arc;
//! use studyflow_checkpoint::InMemoryCheckpointStore;
//! use studyflow_core::{
//!     CompletionError, CompletionRequest, CompletionResponse, CompletionService, ExecutionState,
//!     Executor, HumanInput, InMemoryArtifactSink, PipelineBuilder, ProcessInput, Stage,
//!     StageContext, StageError, StageOutcome, StateUpdate, END,
//! };
//!
//! struct Fixed;
//!
//! #[async_trait]
//! impl CompletionService for Fixed {
//!     async fn generate(&self, _r: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
//!         Ok(CompletionResponse::text("Water moves toward higher solute concentration."))
//!     }
//! }
//!
//! struct Explain;
//!
//! #[async_trait]
//! impl Stage for Explain {
//!     fn name(&self) -> &str {
//!         "explain"
//!     }
//!
//!     async fn run(
//!         &self,
//!         ctx: &StageContext,
//!         state: &ExecutionState,
//!         _input: Option<HumanInput>,
//!     ) -> Result<StageOutcome, StageError> {
//!         let request = CompletionRequest::new("explain", vec![]);
//!         let text = ctx.complete(request).await?.text;
//!         Ok(StageOutcome::goto(END, StateUpdate::new().with_explanation(text)))
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut pipeline = PipelineBuilder::new();
//! pipeline.add_stage(Explain).set_entry("explain").add_finish("explain");
//!
//! let executor = Executor::new(
//!     pipeline.compile()?,
//!     Arc::new(InMemoryCheckpointStore::<ExecutionState>::new()),
//!     Arc::new(Fixed),
//!     Arc::new(InMemoryArtifactSink::new()),
//! );
//!
//! let output = executor.process("thread-1", ProcessInput::text("Explain osmosis")).await?;
//! assert!(output.is_completed());
//! # Ok(())
//! # }
//! ```

pub mod artifact;
pub mod completion;
pub mod error;
pub mod executor;
pub mod fanout;
pub mod feedback;
pub mod fuzzy;
pub mod retry;
pub mod session;
pub mod stage;
pub mod state;

pub use artifact::{Artifact, ArtifactError, ArtifactSink, InMemoryArtifactSink};
pub use completion::{
    CompletionError, CompletionRequest, CompletionResponse, CompletionService, PromptMessage, Role,
};
pub use error::{EngineError, Result, StageError};
pub use executor::{
    Executor, ExecutorConfig, ProcessInput, ProcessOutput, ProcessStatus, ThreadSnapshot,
};
pub use fanout::{FanOutJoin, JoinReport};
pub use feedback::{
    Decision, FeedbackCycle, FeedbackStage, Revision, RevisionResult, TextEdit, Transition,
};
pub use fuzzy::{fuzzy_replace, EditError, EditOutcome, DEFAULT_THRESHOLD};
pub use retry::RetryPolicy;
pub use session::{EditAudit, SessionRegistry, SessionSlot};
pub use stage::{
    FanOutRequest, FanOutUnit, FanOutWorker, HumanInput, PipelineBuilder, Stage, StageContext,
    StageOutcome, StageRegistry, END,
};
pub use state::{
    CycleRecord, ExecutionState, FeedbackMessage, ImageRef, QaPair, Speaker, StateUpdate,
};
pub use studyflow_checkpoint::CyclePhase;
