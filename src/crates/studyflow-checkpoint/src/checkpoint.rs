//! Checkpoint data structures
//!
//! A [`Checkpoint`] is the durable record of one thread: the execution state
//! snapshot, the session correlation id allocated on the thread's first run,
//! and an optional [`Suspension`] describing the stage that is waiting on a
//! human. The state type is generic so the store stays agnostic of what the
//! engine keeps in it.
//!
//! Versions are assigned by the store, never by the caller. A freshly built
//! checkpoint carries version `0`; the first successful save stores it as `1`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Phase of a feedback cycle, persisted so resumption never depends on a
/// live coroutine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CyclePhase {
    /// No feedback has been requested yet
    #[default]
    Initial,
    /// Suspended, surfacing the latest proposal to the human
    AwaitingFeedback,
    /// Human feedback has arrived and a revision is being produced
    Revising,
}

impl std::fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CyclePhase::Initial => "initial",
            CyclePhase::AwaitingFeedback => "awaiting_feedback",
            CyclePhase::Revising => "revising",
        };
        f.write_str(label)
    }
}

/// A paused stage awaiting human input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Suspension {
    /// Name of the stage that yielded
    pub stage: String,

    /// Messages surfaced to the human when the stage yielded
    pub messages: Vec<String>,

    /// Cycle marker at the time of suspension
    pub phase: CyclePhase,
}

impl Suspension {
    /// Create a suspension for `stage` in the awaiting-feedback phase.
    pub fn new(stage: impl Into<String>, messages: Vec<String>) -> Self {
        Self {
            stage: stage.into(),
            messages,
            phase: CyclePhase::AwaitingFeedback,
        }
    }

    /// Override the persisted cycle phase.
    pub fn with_phase(mut self, phase: CyclePhase) -> Self {
        self.phase = phase;
        self
    }
}

/// Durable snapshot of one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint<S> {
    /// Thread this checkpoint belongs to
    pub thread_id: String,

    /// Session correlation id allocated on the first run of the thread
    pub session_id: String,

    /// Execution state snapshot
    pub state: S,

    /// Pending suspension, if the thread is waiting on a human
    pub suspension: Option<Suspension>,

    /// Stage the thread will run next; for a suspended thread this is the
    /// suspended stage, for an interrupted run it is where recovery resumes
    pub cursor: Option<String>,

    /// Store-assigned version (0 until first saved)
    pub version: u64,

    /// When the thread was first checkpointed
    pub created_at: DateTime<Utc>,

    /// When this checkpoint was last written
    pub updated_at: DateTime<Utc>,
}

impl<S> Checkpoint<S> {
    /// Create an unsaved checkpoint.
    pub fn new(thread_id: impl Into<String>, session_id: impl Into<String>, state: S) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            session_id: session_id.into(),
            state,
            suspension: None,
            cursor: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attach (or clear) the pending suspension.
    pub fn with_suspension(mut self, suspension: Option<Suspension>) -> Self {
        self.suspension = suspension;
        self
    }

    /// Record the stage the thread will run next.
    pub fn with_cursor(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }

    /// Returns `true` if a stage is waiting on human input.
    pub fn is_suspended(&self) -> bool {
        self.suspension.is_some()
    }

    /// Name of the suspended stage, if any.
    pub fn suspended_stage(&self) -> Option<&str> {
        self.suspension.as_ref().map(|s| s.stage.as_str())
    }
}
