//! Execution state and partial updates
//!
//! [`ExecutionState`] is the versioned record carrying all pipeline data for
//! one thread. Stages never mutate it directly: they return a
//! [`StateUpdate`] which the executor applies, bumping the version.
//!
//! # Merge semantics
//!
//! | Field | Reducer |
//! |-------|---------|
//! | scalar / `Option` fields | overwrite when the update carries `Some` |
//! | `cycles` | per-stage overwrite |
//! | `edit_count` | additive delta |
//! | `qa_pairs` | **append only** |
//!
//! `qa_pairs` is the accumulator fed by fan-out sub-executions. It can only
//! grow: there is no way to replace it wholesale, and
//! [`StateUpdate::merge`] concatenates, so merging sub-results in any order
//! yields the same multiset.
//!
//! ```rust
//! use studyflow_core::{ExecutionState, QaPair, StateUpdate};
//!
//! let mut state = ExecutionState::new("Explain osmosis", Vec::new());
//! let a = StateUpdate::new().with_qa_pair(QaPair::answered("Why?", "Because."));
//! let b = StateUpdate::new().with_qa_pair(QaPair::answered("How?", "Like so."));
//!
//! state.apply(a.merge(b));
//! assert_eq!(state.qa_pairs().len(), 2);
//! assert_eq!(state.version, 1);
//! ```

use crate::artifact::Artifact;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use studyflow_checkpoint::CyclePhase;

/// Reference to an input image supplied with the question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// URL, data URI, or local path
    pub uri: String,

    /// MIME type if known (e.g. `image/png`)
    pub mime_type: Option<String>,
}

impl ImageRef {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            mime_type: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }
}

/// One follow-up question with its generated answer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QaPair {
    pub question: String,
    pub answer: String,
    /// `true` when the answer is an in-band error report from a failed sub-task
    pub failed: bool,
}

impl QaPair {
    pub fn answered(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: answer.into(),
            failed: false,
        }
    }

    pub fn failed(question: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer: error.into(),
            failed: true,
        }
    }
}

/// Who produced a feedback-history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Speaker {
    Human,
    Assistant,
}

/// One entry of a feedback cycle's conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackMessage {
    pub speaker: Speaker,
    pub content: String,
}

impl FeedbackMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Human,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            content: content.into(),
        }
    }
}

/// Persisted progress of one stage's feedback cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CycleRecord {
    pub phase: CyclePhase,
    /// Alternating proposals and human replies, oldest first
    pub history: Vec<FeedbackMessage>,
    /// Latest proposal surfaced to the human
    pub proposal: Option<String>,
    /// Whether the one-time instructions were already shown
    pub instructions_sent: bool,
    /// Set once the cycle exits to its next stage
    pub finalized: bool,
    /// Number of completed revision rounds
    pub rounds: u32,
}

/// All pipeline data for one thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    pub question: String,
    pub images: Vec<ImageRef>,
    pub recognized_text: Option<String>,
    pub explanation: Option<String>,
    pub synthesis: Option<String>,
    pub follow_up_questions: Vec<String>,
    qa_pairs: Vec<QaPair>,
    pub cycles: BTreeMap<String, CycleRecord>,
    pub edit_count: u32,
    pub pending_input: bool,
    pub last_action: Option<String>,
    /// Per-thread human-in-the-loop overrides keyed by stage name
    pub hitl: BTreeMap<String, bool>,
    /// Incremented on every applied update
    pub version: u64,
}

impl ExecutionState {
    /// Build the initial state of a fresh run.
    pub fn new(question: impl Into<String>, images: Vec<ImageRef>) -> Self {
        Self {
            question: question.into(),
            images,
            recognized_text: None,
            explanation: None,
            synthesis: None,
            follow_up_questions: Vec::new(),
            qa_pairs: Vec::new(),
            cycles: BTreeMap::new(),
            edit_count: 0,
            pending_input: false,
            last_action: None,
            hitl: BTreeMap::new(),
            version: 0,
        }
    }

    /// Accumulated Q&A pairs (append-only).
    pub fn qa_pairs(&self) -> &[QaPair] {
        &self.qa_pairs
    }

    /// Cycle record of `stage`, if the stage has run.
    pub fn cycle(&self, stage: &str) -> Option<&CycleRecord> {
        self.cycles.get(stage)
    }

    /// Whether human review is enabled for `stage` on this thread.
    pub fn hitl_enabled(&self, stage: &str, default: bool) -> bool {
        self.hitl.get(stage).copied().unwrap_or(default)
    }

    /// Apply a partial update and bump the version.
    pub fn apply(&mut self, update: StateUpdate) {
        let StateUpdate {
            recognized_text,
            explanation,
            synthesis,
            follow_up_questions,
            qa_pairs,
            cycles,
            edit_count_delta,
            pending_input,
            last_action,
        } = update;

        if let Some(text) = recognized_text {
            self.recognized_text = Some(text);
        }
        if let Some(text) = explanation {
            self.explanation = Some(text);
        }
        if let Some(text) = synthesis {
            self.synthesis = Some(text);
        }
        if let Some(questions) = follow_up_questions {
            self.follow_up_questions = questions;
        }
        self.qa_pairs.extend(qa_pairs);
        self.cycles.extend(cycles);
        self.edit_count += edit_count_delta;
        if let Some(pending) = pending_input {
            self.pending_input = pending;
        }
        if let Some(action) = last_action {
            self.last_action = Some(action);
        }
        self.version += 1;
    }

    /// Documents persisted through the artifact sink when the pipeline ends.
    pub fn artifacts(&self) -> Vec<Artifact> {
        let mut artifacts = Vec::new();

        if let Some(explanation) = &self.explanation {
            let mut body = format!("# {}\n\n", self.question.trim());
            if let Some(recognized) = &self.recognized_text {
                body.push_str("## From the supplied images\n\n");
                body.push_str(recognized.trim());
                body.push_str("\n\n");
            }
            body.push_str(explanation.trim());
            body.push('\n');
            artifacts.push(Artifact::new("explanation.md", body));
        }

        if !self.qa_pairs.is_empty() {
            let mut pairs = self.qa_pairs.clone();
            pairs.sort();
            let mut body = String::from("# Follow-up questions\n");
            for pair in pairs {
                body.push_str(&format!("\n## {}\n\n{}\n", pair.question.trim(), pair.answer.trim()));
            }
            artifacts.push(Artifact::new("questions.md", body));
        }

        if let Some(synthesis) = &self.synthesis {
            artifacts.push(Artifact::new("document.md", format!("{}\n", synthesis.trim())));
        }

        artifacts
    }
}

/// Partial update returned by a stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StateUpdate {
    pub recognized_text: Option<String>,
    pub explanation: Option<String>,
    pub synthesis: Option<String>,
    pub follow_up_questions: Option<Vec<String>>,
    pub qa_pairs: Vec<QaPair>,
    pub cycles: BTreeMap<String, CycleRecord>,
    pub edit_count_delta: u32,
    pub pending_input: Option<bool>,
    pub last_action: Option<String>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recognized_text(mut self, text: impl Into<String>) -> Self {
        self.recognized_text = Some(text.into());
        self
    }

    pub fn with_explanation(mut self, text: impl Into<String>) -> Self {
        self.explanation = Some(text.into());
        self
    }

    pub fn with_synthesis(mut self, text: impl Into<String>) -> Self {
        self.synthesis = Some(text.into());
        self
    }

    pub fn with_follow_up_questions(mut self, questions: Vec<String>) -> Self {
        self.follow_up_questions = Some(questions);
        self
    }

    pub fn with_qa_pair(mut self, pair: QaPair) -> Self {
        self.qa_pairs.push(pair);
        self
    }

    pub fn with_cycle(mut self, stage: impl Into<String>, record: CycleRecord) -> Self {
        self.cycles.insert(stage.into(), record);
        self
    }

    pub fn with_edits(mut self, count: u32) -> Self {
        self.edit_count_delta += count;
        self
    }

    pub fn with_pending_input(mut self, pending: bool) -> Self {
        self.pending_input = Some(pending);
        self
    }

    pub fn with_last_action(mut self, action: impl Into<String>) -> Self {
        self.last_action = Some(action.into());
        self
    }

    /// Combine two updates as if `other` were applied after `self`.
    ///
    /// Associative; the accumulator part is also commutative up to order.
    pub fn merge(mut self, other: StateUpdate) -> Self {
        let StateUpdate {
            recognized_text,
            explanation,
            synthesis,
            follow_up_questions,
            qa_pairs,
            cycles,
            edit_count_delta,
            pending_input,
            last_action,
        } = other;

        self.recognized_text = recognized_text.or(self.recognized_text);
        self.explanation = explanation.or(self.explanation);
        self.synthesis = synthesis.or(self.synthesis);
        self.follow_up_questions = follow_up_questions.or(self.follow_up_questions);
        self.qa_pairs.extend(qa_pairs);
        self.cycles.extend(cycles);
        self.edit_count_delta += edit_count_delta;
        self.pending_input = pending_input.or(self.pending_input);
        self.last_action = last_action.or(self.last_action);
        self
    }
}
