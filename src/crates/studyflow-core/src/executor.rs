//! Durable, resumable pipeline executor
//!
//! The [`Executor`] drives a thread through the stages of a
//! [`StageRegistry`], persisting a checkpoint after every stage so a crash
//! never replays finished work and a suspended thread can wait indefinitely
//! for a human.
//!
//! # Execution flow
//!
//! ```text
//!  process(thread, input)
//!        │
//!        ▼
//!  run lock (one in-flight call per thread)
//!        │
//!        ▼
//!  load checkpoint ──── none ────────▶ fresh run at entry stage (new session id)
//!        │
//!        ├── suspended ──────────────▶ resume suspended stage with the human input
//!        │
//!        └── not suspended ──────────▶ InvalidThread (use `recover`)
//!
//!  stage loop:
//!    Goto     → apply update → compare-and-save → next stage
//!    FanOut   → apply update → join workers → apply merged results → compare-and-save → `then`
//!    Suspend  → apply update → compare-and-save with Suspension → return messages
//!    __end__  → push artifacts → delete checkpoint → drop session → return messages
//! ```
//!
//! Every save is a compare-and-save against the version this call last
//! wrote. A mismatch means someone deleted (or otherwise replaced) the
//! thread, and the run is abandoned with [`EngineError::ThreadDeleted`].

use crate::artifact::ArtifactSink;
use crate::completion::CompletionService;
use crate::error::{EngineError, Result};
use crate::fanout::FanOutJoin;
use crate::retry::RetryPolicy;
use crate::session::{SessionRegistry, SessionSlot};
use crate::stage::{HumanInput, StageContext, StageOutcome, StageRegistry, END};
use crate::state::{ExecutionState, ImageRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use studyflow_checkpoint::{Checkpoint, CheckpointStore, Suspension};
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Executor tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum stage runs per call
    pub recursion_limit: usize,

    /// Maximum concurrently running fan-out units
    pub max_concurrency: usize,

    /// Backoff for transient completion failures
    pub retry: RetryPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            recursion_limit: 64,
            max_concurrency: 4,
            retry: RetryPolicy::default(),
        }
    }
}

/// Input to [`Executor::process`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProcessInput {
    /// Question on a fresh run, feedback when resuming
    pub text: String,
    pub images: Vec<ImageRef>,
    /// Human-review overrides applied to a fresh run
    pub hitl: BTreeMap<String, bool>,
    /// Structured feedback; derived from `text` when absent
    pub feedback: Option<HumanInput>,
}

impl ProcessInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn feedback(feedback: HumanInput) -> Self {
        Self {
            feedback: Some(feedback),
            ..Self::default()
        }
    }

    pub fn with_images(mut self, images: Vec<ImageRef>) -> Self {
        self.images = images;
        self
    }

    pub fn with_hitl(mut self, stage: impl Into<String>, enabled: bool) -> Self {
        self.hitl.insert(stage.into(), enabled);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessStatus {
    /// Waiting for human input at `stage`
    Suspended { stage: String },
    Completed,
}

/// Result of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOutput {
    pub thread_id: String,
    pub messages: Vec<String>,
    #[serde(flatten)]
    pub status: ProcessStatus,
}

impl ProcessOutput {
    pub fn is_completed(&self) -> bool {
        self.status == ProcessStatus::Completed
    }
}

/// Read-only view of a persisted thread.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThreadSnapshot {
    pub thread_id: String,
    pub session_id: String,
    pub state: ExecutionState,
    /// Stage the thread will run next
    pub stage: Option<String>,
    pub stage_label: Option<String>,
    /// Whether the thread is waiting on a human
    pub pending: bool,
    /// Messages surfaced with the pending suspension
    pub messages: Vec<String>,
    pub version: u64,
    pub updated_at: DateTime<Utc>,
}

/// In-flight bookkeeping of one call.
struct Run {
    thread_id: String,
    session_id: String,
    state: ExecutionState,
    /// Version last written by this call (`None` until the first save)
    version: Option<u64>,
    created_at: DateTime<Utc>,
}

/// Drives threads through a pipeline.
pub struct Executor {
    registry: Arc<StageRegistry>,
    store: Arc<dyn CheckpointStore<ExecutionState>>,
    completion: Arc<dyn CompletionService>,
    artifacts: Arc<dyn ArtifactSink>,
    sessions: Arc<SessionRegistry>,
    config: ExecutorConfig,
}

impl Executor {
    pub fn new(
        registry: StageRegistry,
        store: Arc<dyn CheckpointStore<ExecutionState>>,
        completion: Arc<dyn CompletionService>,
        artifacts: Arc<dyn ArtifactSink>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            store,
            completion,
            artifacts,
            sessions: Arc::new(SessionRegistry::new()),
            config: ExecutorConfig::default(),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a session registry with other components.
    pub fn with_sessions(mut self, sessions: Arc<SessionRegistry>) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn registry(&self) -> &StageRegistry {
        &self.registry
    }

    /// Start a new thread or resume a suspended one.
    pub async fn process(&self, thread_id: &str, input: ProcessInput) -> Result<ProcessOutput> {
        let span = info_span!("process", thread_id = %thread_id);
        async move {
            let (slot, _guard) = self.acquire(thread_id).await;
            let result = async {
                let Some(checkpoint) = self.store.load(thread_id).await? else {
                    return self.start_fresh(thread_id, input, slot.clone()).await;
                };

                if checkpoint.suspension.is_none() {
                    return Err(EngineError::invalid_thread(
                        thread_id,
                        "thread is not waiting for input",
                    ));
                }

                let feedback = match input.feedback {
                    Some(feedback) => feedback,
                    None => HumanInput::from_text(&input.text),
                };
                self.resume_checkpoint(checkpoint, feedback, slot.clone()).await
            }
            .await;
            self.release_unbound(thread_id, &slot);
            result
        }
        .instrument(span)
        .await
    }

    /// Resume a suspended thread. Fails with `InvalidThread` when the thread
    /// has no checkpoint or is not suspended.
    pub async fn resume(&self, thread_id: &str, feedback: HumanInput) -> Result<ProcessOutput> {
        let span = info_span!("resume", thread_id = %thread_id);
        async move {
            let (slot, _guard) = self.acquire(thread_id).await;
            let result = match self.store.load(thread_id).await {
                Ok(Some(checkpoint)) if checkpoint.is_suspended() => {
                    self.resume_checkpoint(checkpoint, feedback, slot.clone()).await
                }
                Ok(Some(_)) => Err(EngineError::invalid_thread(thread_id, "thread is not waiting for input")),
                Ok(None) => Err(EngineError::invalid_thread(thread_id, "no checkpoint to resume")),
                Err(err) => Err(err.into()),
            };
            self.release_unbound(thread_id, &slot);
            result
        }
        .instrument(span)
        .await
    }

    /// Continue a run that was interrupted between stages (e.g. by a crash).
    /// A suspended thread returns its pending messages unchanged.
    pub async fn recover(&self, thread_id: &str) -> Result<ProcessOutput> {
        let span = info_span!("recover", thread_id = %thread_id);
        async move {
            let (slot, _guard) = self.acquire(thread_id).await;
            let result = async {
                let Some(checkpoint) = self.store.load(thread_id).await? else {
                    return Err(EngineError::invalid_thread(thread_id, "no checkpoint to recover"));
                };

                if let Some(suspension) = checkpoint.suspension {
                    return Ok(ProcessOutput {
                        thread_id: thread_id.to_string(),
                        messages: suspension.messages,
                        status: ProcessStatus::Suspended {
                            stage: suspension.stage,
                        },
                    });
                }

                let Some(cursor) = checkpoint.cursor.clone() else {
                    return Err(EngineError::invalid_thread(thread_id, "checkpoint has no cursor"));
                };
                if slot.session_id().is_none() {
                    slot.bind_session(checkpoint.session_id.clone());
                }
                info!(stage = %cursor, "Recovering interrupted run");
                let run = Run {
                    thread_id: checkpoint.thread_id,
                    session_id: checkpoint.session_id,
                    state: checkpoint.state,
                    version: Some(checkpoint.version),
                    created_at: checkpoint.created_at,
                };
                self.drive(run, cursor, None, slot.clone()).await
            }
            .await;
            self.release_unbound(thread_id, &slot);
            result
        }
        .instrument(span)
        .await
    }

    /// Persisted view of a thread, if it exists.
    pub async fn snapshot(&self, thread_id: &str) -> Result<Option<ThreadSnapshot>> {
        let Some(checkpoint) = self.store.load(thread_id).await? else {
            return Ok(None);
        };
        let stage = checkpoint.cursor.clone();
        let (pending, messages) = match &checkpoint.suspension {
            Some(suspension) => (true, suspension.messages.clone()),
            None => (false, Vec::new()),
        };

        Ok(Some(ThreadSnapshot {
            thread_id: checkpoint.thread_id,
            session_id: checkpoint.session_id,
            stage_label: stage.as_deref().map(|s| self.registry.label(s)),
            stage,
            pending,
            messages,
            version: checkpoint.version,
            updated_at: checkpoint.updated_at,
            state: checkpoint.state,
        }))
    }

    /// Delete a thread: checkpoint, session correlation, and edit audit.
    /// Idempotent; returns whether a checkpoint existed.
    pub async fn delete_thread(&self, thread_id: &str) -> Result<bool> {
        let had_session = self.sessions.remove(thread_id);
        let existed = self.store.delete(thread_id).await?;
        info!(thread_id = %thread_id, existed, had_session, "Thread deleted");
        Ok(existed)
    }

    /// Ids of all persisted threads.
    pub async fn threads(&self) -> Result<Vec<String>> {
        Ok(self.store.list().await?)
    }

    /// Ids of persisted threads that are neither finished nor suspended.
    pub async fn interrupted_threads(&self) -> Result<Vec<String>> {
        let mut interrupted = Vec::new();
        for thread_id in self.store.list().await? {
            if let Some(checkpoint) = self.store.load(&thread_id).await? {
                if !checkpoint.is_suspended() && checkpoint.cursor.is_some() {
                    interrupted.push(thread_id);
                }
            }
        }
        Ok(interrupted)
    }

    async fn acquire(&self, thread_id: &str) -> (Arc<SessionSlot>, OwnedMutexGuard<()>) {
        loop {
            let slot = self.sessions.slot(thread_id);
            let guard = slot.lock_run().await;
            // Deleted while we waited; the registry now hands out a fresh slot.
            if !slot.is_cancelled() {
                return (slot, guard);
            }
        }
    }

    /// Drop a slot that ended the call without a session bound to it, i.e.
    /// the call was rejected before any run started.
    fn release_unbound(&self, thread_id: &str, slot: &Arc<SessionSlot>) {
        if slot.session_id().is_none() && self.sessions.remove_if(thread_id, slot) {
            debug!(thread_id = %thread_id, "Released idle session slot");
        }
    }

    async fn start_fresh(&self, thread_id: &str, input: ProcessInput, slot: Arc<SessionSlot>) -> Result<ProcessOutput> {
        if input.text.trim().is_empty() {
            return Err(EngineError::invalid_thread(thread_id, "empty input"));
        }

        let session_id = Uuid::new_v4().to_string();
        slot.bind_session(session_id.clone());
        info!(session_id = %session_id, images = input.images.len(), "Starting new thread");

        let mut state = ExecutionState::new(input.text.trim(), input.images);
        state.hitl = input.hitl;

        let run = Run {
            thread_id: thread_id.to_string(),
            session_id,
            state,
            version: None,
            created_at: Utc::now(),
        };
        let entry = self.registry.entry().to_string();
        let result = self.drive(run, entry, None, slot.clone()).await;

        if result.is_err() {
            // Nothing persisted means nothing to resume; drop the session.
            if let Ok(None) = self.store.load(thread_id).await {
                self.sessions.remove_if(thread_id, &slot);
            }
        }
        result
    }

    async fn resume_checkpoint(
        &self,
        checkpoint: Checkpoint<ExecutionState>,
        feedback: HumanInput,
        slot: Arc<SessionSlot>,
    ) -> Result<ProcessOutput> {
        let stage = match checkpoint.suspended_stage() {
            Some(stage) => stage.to_string(),
            None => return Err(EngineError::invalid_thread(&checkpoint.thread_id, "thread is not waiting for input")),
        };
        if slot.session_id().is_none() {
            debug!(session_id = %checkpoint.session_id, "Rebinding session after restart");
            slot.bind_session(checkpoint.session_id.clone());
        }
        info!(stage = %stage, "Resuming suspended thread");

        let run = Run {
            thread_id: checkpoint.thread_id,
            session_id: checkpoint.session_id,
            state: checkpoint.state,
            version: Some(checkpoint.version),
            created_at: checkpoint.created_at,
        };
        self.drive(run, stage, Some(feedback), slot).await
    }

    async fn drive(
        &self,
        mut run: Run,
        start: String,
        mut input: Option<HumanInput>,
        slot: Arc<SessionSlot>,
    ) -> Result<ProcessOutput> {
        let mut current = start;
        let mut steps = 0usize;

        loop {
            if current == END {
                return self.finish(run).await;
            }
            if steps >= self.config.recursion_limit {
                return Err(EngineError::RecursionLimit {
                    limit: self.config.recursion_limit,
                });
            }
            steps += 1;

            if slot.is_cancelled() {
                return Err(EngineError::ThreadDeleted(run.thread_id));
            }

            let stage = self.registry.stage(&current)?;
            let ctx = StageContext::new(
                run.thread_id.clone(),
                run.session_id.clone(),
                self.completion.clone(),
                self.config.retry.clone(),
                slot.clone(),
            );

            let span = info_span!("stage", session_id = %run.session_id, stage = %current);
            let outcome = stage
                .run(&ctx, &run.state, input.take())
                .instrument(span)
                .await
                .map_err(|err| {
                    warn!(stage = %current, error = %err, "Stage failed");
                    EngineError::stage_failed(current.clone(), err)
                })?;

            match outcome {
                StageOutcome::Goto { next, update } => {
                    self.registry.check_transition(&current, &next)?;
                    run.state.apply(update);
                    debug!(from = %current, to = %next, version = run.state.version, "Stage completed");
                    if next != END {
                        self.persist(&mut run, &slot, None, Some(next.clone())).await?;
                    }
                    current = next;
                }
                StageOutcome::FanOut { update, request } => {
                    self.registry.check_transition(&current, &request.then)?;
                    let worker = self.registry.worker(&request.worker)?;
                    run.state.apply(update);

                    let report = FanOutJoin::new(self.config.max_concurrency)
                        .run(worker, &ctx, Arc::new(run.state.clone()), request.units)
                        .await?;
                    info!(
                        stage = %current,
                        worker = %request.worker,
                        succeeded = report.succeeded,
                        failed = report.failed,
                        "Fan-out complete"
                    );
                    run.state.apply(report.update);

                    if request.then != END {
                        self.persist(&mut run, &slot, None, Some(request.then.clone())).await?;
                    }
                    current = request.then;
                }
                StageOutcome::Suspend { update, messages, phase } => {
                    run.state.apply(update);
                    let suspension = Suspension::new(current.clone(), messages.clone()).with_phase(phase);
                    self.persist(&mut run, &slot, Some(suspension), Some(current.clone())).await?;
                    info!(stage = %current, version = run.state.version, "Thread suspended for feedback");

                    return Ok(ProcessOutput {
                        thread_id: run.thread_id,
                        messages,
                        status: ProcessStatus::Suspended { stage: current },
                    });
                }
            }
        }
    }

    async fn persist(
        &self,
        run: &mut Run,
        slot: &SessionSlot,
        suspension: Option<Suspension>,
        cursor: Option<String>,
    ) -> Result<()> {
        if slot.is_cancelled() {
            return Err(EngineError::ThreadDeleted(run.thread_id.clone()));
        }

        let mut checkpoint = Checkpoint::new(run.thread_id.clone(), run.session_id.clone(), run.state.clone())
            .with_suspension(suspension)
            .with_cursor(cursor);
        checkpoint.created_at = run.created_at;

        match self.store.compare_and_save(checkpoint, run.version).await {
            Ok(version) => run.version = Some(version),
            Err(err) if err.is_conflict() => {
                warn!(thread_id = %run.thread_id, error = %err, "Checkpoint conflict, abandoning run");
                return Err(EngineError::ThreadDeleted(run.thread_id.clone()));
            }
            Err(err) => return Err(err.into()),
        }

        // A delete that raced the save must not leave the thread behind, but
        // a newer thread under the same id is not ours to remove.
        if slot.is_cancelled() {
            if let Some(version) = run.version {
                self.store.delete_if_version(&run.thread_id, version).await?;
            }
            return Err(EngineError::ThreadDeleted(run.thread_id.clone()));
        }
        Ok(())
    }

    async fn finish(&self, run: Run) -> Result<ProcessOutput> {
        let artifacts = run.state.artifacts();
        let mut saved = Vec::with_capacity(artifacts.len());
        for artifact in &artifacts {
            match self.artifacts.push(&run.thread_id, &artifact.name, &artifact.content).await {
                Ok(()) => saved.push(artifact.name.clone()),
                Err(err) => {
                    warn!(thread_id = %run.thread_id, artifact = %artifact.name, error = %err, "Artifact push failed");
                }
            }
        }

        self.store.delete(&run.thread_id).await?;
        self.sessions.remove(&run.thread_id);
        info!(thread_id = %run.thread_id, artifacts = saved.len(), "Thread completed");

        let mut messages = Vec::new();
        if let Some(document) = run.state.synthesis.as_ref().or(run.state.explanation.as_ref()) {
            messages.push(document.clone());
        }
        messages.push(if saved.is_empty() {
            "All done.".to_string()
        } else {
            format!("All done. Saved {}.", saved.join(", "))
        });

        Ok(ProcessOutput {
            thread_id: run.thread_id,
            messages,
            status: ProcessStatus::Completed,
        })
    }
}
