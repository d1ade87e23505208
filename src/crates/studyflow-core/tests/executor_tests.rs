//! Executor integration tests
//!
//! A small pipeline exercising every outcome kind:
//!
//! ```text
//! draft (feedback cycle, HITL on) ──finalize──▶ fan-out `answer` ×K ──▶ wrap ──▶ __end__
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use studyflow_checkpoint::{Checkpoint, CheckpointStore, InMemoryCheckpointStore};
use studyflow_core::{
    ArtifactError, ArtifactSink, CompletionError, CompletionRequest, CompletionResponse,
    CompletionService, EngineError, ExecutionState, Executor, ExecutorConfig, FanOutRequest,
    FanOutUnit, FanOutWorker, FeedbackCycle, FeedbackStage, HumanInput, InMemoryArtifactSink,
    PipelineBuilder, ProcessInput, ProcessStatus, PromptMessage, QaPair, RetryPolicy, Stage,
    StageContext, StageError, StageOutcome, StateUpdate, Transition, END,
};
use tokio::sync::Notify;

type Script = dyn Fn(&CompletionRequest) -> Result<CompletionResponse, CompletionError> + Send + Sync;

struct ScriptedCompletion {
    script: Box<Script>,
    calls: AtomicUsize,
}

impl ScriptedCompletion {
    fn new(
        script: impl Fn(&CompletionRequest) -> Result<CompletionResponse, CompletionError> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionService for ScriptedCompletion {
    async fn generate(&self, request: CompletionRequest) -> Result<CompletionResponse, CompletionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        (self.script)(&request)
    }
}

fn default_script(request: &CompletionRequest) -> Result<CompletionResponse, CompletionError> {
    match request.purpose.as_str() {
        "draft.proposal" => Ok(CompletionResponse::text("Why is it?\nHow bad can it get?\nWhere next?")),
        "draft.revision" => Ok(CompletionResponse::structured(json!({
            "decision": "continue",
            "proposal": "Why is it?\nWhere next?",
            "reply": "Dropped one."
        }))),
        "answer" => {
            let question = request.messages.last().map(|m| m.content.clone()).unwrap_or_default();
            if question.contains("bad") {
                Err(CompletionError::Fatal("refused".into()))
            } else {
                Ok(CompletionResponse::text(format!("Answer to {question}")))
            }
        }
        other => Err(CompletionError::Fatal(format!("unexpected purpose {other}"))),
    }
}

struct Draft;

#[async_trait]
impl FeedbackStage for Draft {
    fn name(&self) -> &str {
        "draft"
    }

    fn label(&self) -> &str {
        "Drafting follow-up questions"
    }

    fn hitl_default(&self) -> bool {
        true
    }

    fn instructions(&self) -> Option<String> {
        Some("Reply 'approve' to continue.".to_string())
    }

    fn proposal_request(&self, state: &ExecutionState) -> CompletionRequest {
        CompletionRequest::new("draft.proposal", vec![PromptMessage::user(state.question.clone())])
    }

    fn revision_prompt(&self, _state: &ExecutionState) -> String {
        "Revise the question list.".to_string()
    }

    fn accept(&self, _state: &ExecutionState, proposal: &str) -> StateUpdate {
        StateUpdate::new().with_follow_up_questions(proposal.lines().map(str::to_string).collect())
    }

    fn next(&self, _state: &ExecutionState, accepted: &StateUpdate) -> Transition {
        let units = accepted
            .follow_up_questions
            .clone()
            .unwrap_or_default()
            .into_iter()
            .enumerate()
            .map(|(i, q)| FanOutUnit::new(format!("q{i}"), json!(q)))
            .collect();
        Transition::FanOut(FanOutRequest {
            worker: "answer".to_string(),
            units,
            then: "wrap".to_string(),
        })
    }
}

struct Answer;

#[async_trait]
impl FanOutWorker for Answer {
    fn name(&self) -> &str {
        "answer"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        _state: &ExecutionState,
        unit: &FanOutUnit,
    ) -> Result<StateUpdate, StageError> {
        let question = unit.payload.as_str().unwrap_or_default().to_string();
        let response = ctx
            .complete(CompletionRequest::new("answer", vec![PromptMessage::user(question.clone())]))
            .await?;
        Ok(StateUpdate::new().with_qa_pair(QaPair::answered(question, response.text)))
    }

    fn on_error(&self, unit: &FanOutUnit, error: &str) -> StateUpdate {
        let question = unit.payload.as_str().unwrap_or_default();
        StateUpdate::new().with_qa_pair(QaPair::failed(question, error))
    }
}

struct Wrap;

#[async_trait]
impl Stage for Wrap {
    fn name(&self) -> &str {
        "wrap"
    }

    async fn run(
        &self,
        _ctx: &StageContext,
        state: &ExecutionState,
        _input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        let body = state
            .qa_pairs()
            .iter()
            .map(|p| format!("{}: {}", p.question, p.answer))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(StageOutcome::goto(END, StateUpdate::new().with_synthesis(body)))
    }
}

struct Harness {
    executor: Arc<Executor>,
    store: Arc<InMemoryCheckpointStore<ExecutionState>>,
    sink: Arc<InMemoryArtifactSink>,
}

fn config() -> ExecutorConfig {
    ExecutorConfig {
        retry: RetryPolicy::new(3).with_initial_interval(0.0).with_jitter(false),
        ..ExecutorConfig::default()
    }
}

fn harness(completion: Arc<ScriptedCompletion>) -> Harness {
    let mut pipeline = PipelineBuilder::new();
    pipeline
        .add_stage(FeedbackCycle::new(Draft))
        .add_stage(Wrap)
        .add_worker(Answer)
        .set_entry("draft")
        .add_edge("draft", "wrap")
        .add_finish("wrap");

    let store = Arc::new(InMemoryCheckpointStore::<ExecutionState>::new());
    let sink = Arc::new(InMemoryArtifactSink::new());
    let executor = Executor::new(pipeline.compile().unwrap(), store.clone(), completion, sink.clone())
        .with_config(config());

    Harness {
        executor: Arc::new(executor),
        store,
        sink,
    }
}

#[tokio::test]
async fn test_suspend_approve_fan_out_complete() {
    let completion = ScriptedCompletion::new(default_script);
    let h = harness(completion.clone());

    let first = h.executor.process("t-1", ProcessInput::text("Explain tides")).await.unwrap();
    assert_eq!(
        first.status,
        ProcessStatus::Suspended {
            stage: "draft".to_string()
        }
    );
    assert_eq!(first.messages[0], "Reply 'approve' to continue.");
    assert!(first.messages[1].contains("How bad can it get?"));

    let snapshot = h.executor.snapshot("t-1").await.unwrap().unwrap();
    assert!(snapshot.pending);
    assert_eq!(snapshot.stage_label.as_deref(), Some("Drafting follow-up questions"));

    let done = h.executor.process("t-1", ProcessInput::text("  Approve ")).await.unwrap();
    assert!(done.is_completed());
    assert!(done.messages.last().unwrap().contains("document.md"));

    // Proposal, then one answer per question; approval itself makes no call.
    assert_eq!(completion.calls(), 4);
    assert!(h.store.load("t-1").await.unwrap().is_none());
    assert!(h.executor.sessions().get("t-1").is_none());

    let names: Vec<_> = h.sink.get("t-1").await.into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["questions.md", "document.md"]);
    let questions = &h.sink.get("t-1").await[0].content;
    assert!(questions.contains("Answer to Why is it?"));
    assert!(questions.contains("refused"));
}

#[tokio::test]
async fn test_revision_round_then_approve() {
    let h = harness(ScriptedCompletion::new(default_script));

    h.executor.process("t-1", ProcessInput::text("Explain tides")).await.unwrap();
    let revised = h
        .executor
        .process("t-1", ProcessInput::text("drop the scary one"))
        .await
        .unwrap();
    assert_eq!(revised.messages, vec!["Dropped one.".to_string(), "Why is it?\nWhere next?".to_string()]);

    let done = h.executor.resume("t-1", HumanInput::Approve).await.unwrap();
    assert!(done.is_completed());
    let questions = &h.sink.get("t-1").await[0].content;
    assert!(!questions.contains("How bad"));
}

#[tokio::test]
async fn test_threads_are_independent() {
    let h = harness(ScriptedCompletion::new(default_script));

    h.executor.process("a", ProcessInput::text("Explain X")).await.unwrap();
    h.executor.process("b", ProcessInput::text("Explain X")).await.unwrap();

    let a = h.executor.snapshot("a").await.unwrap().unwrap();
    let b = h.executor.snapshot("b").await.unwrap().unwrap();
    assert_ne!(a.session_id, b.session_id);

    h.executor.process("a", ProcessInput::text("approve")).await.unwrap();
    assert!(h.executor.snapshot("a").await.unwrap().is_none());
    assert!(h.executor.snapshot("b").await.unwrap().unwrap().pending);
}

#[tokio::test]
async fn test_delete_is_idempotent() {
    let h = harness(ScriptedCompletion::new(default_script));
    h.executor.process("t-1", ProcessInput::text("Explain tides")).await.unwrap();

    assert!(h.executor.delete_thread("t-1").await.unwrap());
    assert!(!h.executor.delete_thread("t-1").await.unwrap());
    assert!(!h.executor.delete_thread("never-existed").await.unwrap());
    assert!(h.executor.threads().await.unwrap().is_empty());

    let err = h.executor.resume("t-1", HumanInput::Approve).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidThread { .. }));
}

#[tokio::test]
async fn test_empty_first_input_is_rejected() {
    let completion = ScriptedCompletion::new(default_script);
    let h = harness(completion.clone());

    let err = h.executor.process("t-1", ProcessInput::text("   ")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidThread { .. }));
    assert!(h.executor.threads().await.unwrap().is_empty());
    assert_eq!(completion.calls(), 0);
}

#[tokio::test]
async fn test_rejected_calls_release_sessions() {
    let h = harness(ScriptedCompletion::new(default_script));

    for i in 0..50 {
        let id = format!("empty-{i}");
        let err = h.executor.process(&id, ProcessInput::text("")).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidThread { .. }));
    }
    for i in 0..10 {
        let id = format!("missing-{i}");
        assert!(h.executor.resume(&id, HumanInput::Approve).await.is_err());
        assert!(h.executor.recover(&id).await.is_err());
    }
    assert_eq!(h.executor.sessions().len(), 0);

    // A thread that is checkpointed but not waiting for input.
    let checkpoint = Checkpoint::new("idle", "session-1", ExecutionState::new("Explain tides", Vec::new()))
        .with_cursor(Some("wrap".to_string()));
    h.store.save(checkpoint).await.unwrap();
    assert!(h.executor.process("idle", ProcessInput::text("hello")).await.is_err());
    assert!(h.executor.resume("idle", HumanInput::Approve).await.is_err());
    assert_eq!(h.executor.sessions().len(), 0);
}

#[tokio::test]
async fn test_blank_feedback_resumes_suspended_thread() {
    let completion = ScriptedCompletion::new(default_script);
    let h = harness(completion.clone());
    h.executor.process("t-1", ProcessInput::text("Explain tides")).await.unwrap();

    let output = h.executor.process("t-1", ProcessInput::text("   ")).await.unwrap();
    assert_eq!(
        output.status,
        ProcessStatus::Suspended {
            stage: "draft".to_string()
        }
    );
    assert_eq!(output.messages[0], "Dropped one.");
    assert_eq!(completion.calls(), 2);
    assert_eq!(h.executor.sessions().len(), 1);
}

#[tokio::test]
async fn test_stage_failure_keeps_last_checkpoint() {
    let completion = ScriptedCompletion::new(|request| match request.purpose.as_str() {
        "draft.revision" => Err(CompletionError::Transient("503".into())),
        _ => default_script(request),
    });
    let h = harness(completion.clone());

    h.executor.process("t-1", ProcessInput::text("Explain tides")).await.unwrap();
    let before = h.store.load("t-1").await.unwrap().unwrap();

    let err = h
        .executor
        .process("t-1", ProcessInput::text("make it shorter"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::StageFailed { ref stage, .. } if stage == "draft"));
    // One proposal call plus three revision attempts.
    assert_eq!(completion.calls(), 4);

    let after = h.store.load("t-1").await.unwrap().unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_fresh_failure_leaves_nothing_behind() {
    let h = harness(ScriptedCompletion::new(|_| Err(CompletionError::Fatal("401".into()))));

    let err = h.executor.process("t-1", ProcessInput::text("Explain tides")).await.unwrap_err();
    assert!(matches!(err, EngineError::StageFailed { .. }));
    assert!(h.executor.threads().await.unwrap().is_empty());
    assert!(h.executor.sessions().is_empty());
}

#[tokio::test]
async fn test_recover_interrupted_run() {
    let h = harness(ScriptedCompletion::new(default_script));

    // A crash after the fan-out left the thread checkpointed at `wrap`.
    let mut state = ExecutionState::new("Explain tides", Vec::new());
    state.apply(StateUpdate::new().with_qa_pair(QaPair::answered("Why?", "Gravity.")));
    let checkpoint = Checkpoint::new("t-1", "session-1", state).with_cursor(Some("wrap".to_string()));
    h.store.save(checkpoint).await.unwrap();

    assert_eq!(h.executor.interrupted_threads().await.unwrap(), vec!["t-1".to_string()]);

    let err = h.executor.process("t-1", ProcessInput::text("hello")).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidThread { .. }));

    let done = h.executor.recover("t-1").await.unwrap();
    assert!(done.is_completed());
    assert_eq!(h.sink.get("t-1").await.len(), 2);
}

#[tokio::test]
async fn test_recursion_limit() {
    struct Loop;

    #[async_trait]
    impl Stage for Loop {
        fn name(&self) -> &str {
            "loop"
        }

        async fn run(
            &self,
            _ctx: &StageContext,
            _state: &ExecutionState,
            _input: Option<HumanInput>,
        ) -> Result<StageOutcome, StageError> {
            Ok(StageOutcome::goto("loop", StateUpdate::new()))
        }
    }

    let mut pipeline = PipelineBuilder::new();
    pipeline.add_stage(Loop).set_entry("loop").add_edge("loop", "loop");
    let executor = Executor::new(
        pipeline.compile().unwrap(),
        Arc::new(InMemoryCheckpointStore::<ExecutionState>::new()),
        ScriptedCompletion::new(default_script),
        Arc::new(InMemoryArtifactSink::new()),
    )
    .with_config(ExecutorConfig {
        recursion_limit: 5,
        ..config()
    });

    let err = executor.process("t-1", ProcessInput::text("go")).await.unwrap_err();
    assert!(matches!(err, EngineError::RecursionLimit { limit: 5 }));
}

struct Gate {
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Stage for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn run(
        &self,
        _ctx: &StageContext,
        _state: &ExecutionState,
        _input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        self.reached.notify_one();
        self.release.notified().await;
        Ok(StageOutcome::goto("wrap", StateUpdate::new().with_explanation("late")))
    }
}

#[tokio::test]
async fn test_delete_mid_run_abandons_run() {
    let reached = Arc::new(Notify::new());
    let release = Arc::new(Notify::new());

    let mut pipeline = PipelineBuilder::new();
    pipeline
        .add_stage(Gate {
            reached: reached.clone(),
            release: release.clone(),
        })
        .add_stage(Wrap)
        .set_entry("gate")
        .add_edge("gate", "wrap")
        .add_finish("wrap");
    let store = Arc::new(InMemoryCheckpointStore::<ExecutionState>::new());
    let executor = Arc::new(Executor::new(
        pipeline.compile().unwrap(),
        store.clone(),
        ScriptedCompletion::new(default_script),
        Arc::new(InMemoryArtifactSink::new()),
    ));

    let running = executor.clone();
    let handle = tokio::spawn(async move { running.process("t-1", ProcessInput::text("go")).await });

    reached.notified().await;
    executor.delete_thread("t-1").await.unwrap();
    release.notify_one();

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, EngineError::ThreadDeleted(_)));
    assert!(store.load("t-1").await.unwrap().is_none());
}

struct BrokenSink;

#[async_trait]
impl ArtifactSink for BrokenSink {
    async fn push(&self, _thread_id: &str, _name: &str, _content: &str) -> Result<(), ArtifactError> {
        Err(ArtifactError::Rejected("disk full".into()))
    }
}

#[tokio::test]
async fn test_artifact_failures_do_not_block_completion() {
    let mut pipeline = PipelineBuilder::new();
    pipeline.add_stage(Wrap).set_entry("wrap").add_finish("wrap");
    let store = Arc::new(InMemoryCheckpointStore::<ExecutionState>::new());
    let executor = Executor::new(
        pipeline.compile().unwrap(),
        store.clone(),
        ScriptedCompletion::new(default_script),
        Arc::new(BrokenSink),
    );

    let done = executor.process("t-1", ProcessInput::text("go")).await.unwrap();
    assert!(done.is_completed());
    assert_eq!(done.messages.last().map(String::as_str), Some("All done."));
    assert!(store.load("t-1").await.unwrap().is_none());
}

/// Records the state it is resumed with.
struct Recorder {
    seen: Arc<Mutex<Option<ExecutionState>>>,
}

#[async_trait]
impl Stage for Recorder {
    fn name(&self) -> &str {
        "record"
    }

    async fn run(
        &self,
        _ctx: &StageContext,
        state: &ExecutionState,
        input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        match input {
            None => Ok(StageOutcome::suspend(
                StateUpdate::new()
                    .with_explanation("draft")
                    .with_qa_pair(QaPair::answered("q", "a"))
                    .with_pending_input(true),
                vec!["waiting".to_string()],
            )),
            Some(_) => {
                *self.seen.lock() = Some(state.clone());
                Ok(StageOutcome::goto(END, StateUpdate::new()))
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_resume_sees_exact_suspended_state(feedback in "\\PC{0,40}") {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        runtime.block_on(async {
            let seen = Arc::new(Mutex::new(None));
            let mut pipeline = PipelineBuilder::new();
            pipeline
                .add_stage(Recorder { seen: seen.clone() })
                .set_entry("record")
                .add_finish("record");
            let store = Arc::new(InMemoryCheckpointStore::<ExecutionState>::new());
            let executor = Executor::new(
                pipeline.compile().unwrap(),
                store.clone(),
                ScriptedCompletion::new(default_script),
                Arc::new(InMemoryArtifactSink::new()),
            );

            executor.process("t", ProcessInput::text("question")).await.unwrap();
            let suspended = store.load("t").await.unwrap().unwrap().state;

            executor.process("t", ProcessInput::text(feedback.clone())).await.unwrap();

            assert_eq!(seen.lock().clone(), Some(suspended));
        });
    }
}
