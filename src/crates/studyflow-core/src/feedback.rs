//! Human-in-the-loop feedback cycle
//!
//! [`FeedbackCycle`] wraps a [`FeedbackStage`] and turns it into a [`Stage`]
//! that proposes something, waits for a human, revises, and eventually
//! finalizes. The cycle phase is persisted in the stage's [`CycleRecord`],
//! so resuming is a plain re-entry with the human's input.
//!
//! ```text
//!               ┌─────────────┐
//!   (no input)  │   Initial   │  propose()
//!  ───────────▶ │             │ ──────────────┐
//!               └─────────────┘               │ HITL off ──▶ accept ──▶ next
//!                                             ▼
//!               ┌──────────────────┐  suspend: instructions (first time) + proposal
//!               │ AwaitingFeedback │ ◀──────────────────────────────┐
//!               └────────┬─────────┘                                │
//!      Approve ──▶ accept│current            Revise(text)           │
//!      Skip    ──▶ skip  │                        ▼                 │
//!                        │               ┌──────────────┐  continue │
//!                        │               │   Revising   │ ──────────┘
//!                        │               └──────┬───────┘  (edit error: re-suspend, unchanged)
//!                        ▼                      │ finalize
//!                    next stage / fan-out ◀─────┘
//! ```
//!
//! Revisions are requested with the full feedback history and a JSON
//! schema whose `decision` is `continue` or `finalize`.

use crate::completion::{CompletionRequest, CompletionResponse, PromptMessage};
use crate::error::StageError;
use crate::fuzzy::EditError;
use crate::stage::{FanOutRequest, HumanInput, Stage, StageContext, StageOutcome};
use crate::state::{CycleRecord, ExecutionState, FeedbackMessage, Speaker, StateUpdate};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use studyflow_checkpoint::CyclePhase;
use tracing::{debug, info};

/// Model's verdict on a revision round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Show the revised proposal and wait for more feedback
    Continue,
    /// The human is satisfied; accept the revised proposal
    Finalize,
}

/// One targeted replacement requested by a revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextEdit {
    pub old_text: String,
    pub new_text: String,
}

/// Structured revision returned by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub decision: Decision,
    #[serde(default)]
    pub proposal: Option<String>,
    #[serde(default)]
    pub edits: Vec<TextEdit>,
    /// Short note addressed to the human
    #[serde(default)]
    pub reply: Option<String>,
}

/// A proposal together with the state changes producing it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RevisionResult {
    pub proposal: String,
    pub update: StateUpdate,
}

impl RevisionResult {
    pub fn new(proposal: impl Into<String>) -> Self {
        Self {
            proposal: proposal.into(),
            update: StateUpdate::new(),
        }
    }

    pub fn with_update(mut self, update: StateUpdate) -> Self {
        self.update = update;
        self
    }
}

/// Where a finalized cycle goes.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Stage(String),
    FanOut(FanOutRequest),
}

/// Schema requiring a decision and a revised proposal.
pub fn revision_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "decision": { "type": "string", "enum": ["continue", "finalize"] },
            "proposal": { "type": "string" },
            "reply": { "type": "string" }
        },
        "required": ["decision", "proposal"],
        "additionalProperties": false
    })
}

/// Schema requiring a decision and a list of targeted edits.
pub fn edit_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "decision": { "type": "string", "enum": ["continue", "finalize"] },
            "edits": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "old_text": { "type": "string" },
                        "new_text": { "type": "string" }
                    },
                    "required": ["old_text", "new_text"],
                    "additionalProperties": false
                }
            },
            "reply": { "type": "string" }
        },
        "required": ["decision", "edits"],
        "additionalProperties": false
    })
}

/// Per-stage behaviour plugged into a [`FeedbackCycle`].
#[async_trait]
pub trait FeedbackStage: Send + Sync {
    fn name(&self) -> &str;

    fn label(&self) -> &str {
        self.name()
    }

    /// Whether human review is on when the thread has no override.
    fn hitl_default(&self) -> bool;

    /// One-time guidance shown with the first suspension.
    fn instructions(&self) -> Option<String> {
        None
    }

    /// Request producing the initial proposal.
    fn proposal_request(&self, state: &ExecutionState) -> CompletionRequest;

    /// System prompt for revision rounds.
    fn revision_prompt(&self, state: &ExecutionState) -> String;

    fn revision_schema(&self) -> Value {
        revision_schema()
    }

    /// Produce the initial proposal.
    async fn propose(&self, ctx: &StageContext, state: &ExecutionState) -> Result<RevisionResult, StageError> {
        let response = ctx.complete(self.proposal_request(state)).await?;
        let proposal = response.text.trim();
        if proposal.is_empty() {
            return Err(StageError::invalid_response(format!("{} returned an empty proposal", self.name())));
        }
        Ok(RevisionResult::new(proposal))
    }

    /// Request for one revision round, carrying the full history.
    fn revision_request(&self, state: &ExecutionState, history: &[FeedbackMessage]) -> CompletionRequest {
        let mut messages = vec![PromptMessage::system(self.revision_prompt(state))];
        messages.extend(history.iter().map(|entry| match entry.speaker {
            Speaker::Human => PromptMessage::user(entry.content.clone()),
            Speaker::Assistant => PromptMessage::assistant(entry.content.clone()),
        }));
        CompletionRequest::new(format!("{}.revision", self.name()), messages).with_schema(self.revision_schema())
    }

    fn parse_revision(&self, response: &CompletionResponse) -> Result<Revision, StageError> {
        Ok(response.parse()?)
    }

    fn is_approved(&self, revision: &Revision) -> bool {
        revision.decision == Decision::Finalize
    }

    /// Turn a parsed revision into the next proposal.
    async fn apply_revision(
        &self,
        _ctx: &StageContext,
        _state: &ExecutionState,
        current: &str,
        revision: &Revision,
    ) -> Result<RevisionResult, EditError> {
        let proposal = revision
            .proposal
            .as_deref()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(current);
        Ok(RevisionResult::new(proposal))
    }

    /// State changes when `proposal` is accepted.
    fn accept(&self, state: &ExecutionState, proposal: &str) -> StateUpdate;

    /// State changes when the human skips the stage.
    fn skip(&self, _state: &ExecutionState) -> StateUpdate {
        StateUpdate::new()
    }

    /// Where to go once accepted (or skipped).
    fn next(&self, state: &ExecutionState, accepted: &StateUpdate) -> Transition;

    /// Render a proposal for the human.
    fn present(&self, proposal: &str) -> String {
        proposal.to_string()
    }
}

/// [`Stage`] adapter running the feedback cycle of a [`FeedbackStage`].
pub struct FeedbackCycle<F> {
    inner: F,
}

impl<F: FeedbackStage> FeedbackCycle<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    fn finalize(
        &self,
        state: &ExecutionState,
        mut record: CycleRecord,
        proposal: &str,
        prior: StateUpdate,
        action: &str,
    ) -> StageOutcome {
        let accepted = prior.merge(self.inner.accept(state, proposal));
        record.proposal = Some(proposal.to_string());
        record.finalized = true;
        record.phase = CyclePhase::Initial;
        self.exit(state, record, accepted, action)
    }

    fn exit(&self, state: &ExecutionState, record: CycleRecord, accepted: StateUpdate, action: &str) -> StageOutcome {
        let transition = self.inner.next(state, &accepted);
        let update = accepted
            .with_cycle(self.inner.name(), record)
            .with_pending_input(false)
            .with_last_action(format!("{}:{}", self.inner.name(), action));

        match transition {
            Transition::Stage(next) => StageOutcome::goto(next, update),
            Transition::FanOut(request) => StageOutcome::FanOut { update, request },
        }
    }

    fn suspend(
        &self,
        mut record: CycleRecord,
        proposal: &str,
        lead: Option<String>,
        prior: StateUpdate,
        action: &str,
    ) -> StageOutcome {
        let mut messages = Vec::new();
        if !record.instructions_sent {
            if let Some(instructions) = self.inner.instructions() {
                messages.push(instructions);
            }
            record.instructions_sent = true;
        }
        messages.extend(lead);
        messages.push(self.inner.present(proposal));

        record.proposal = Some(proposal.to_string());
        record.phase = CyclePhase::AwaitingFeedback;

        let update = prior
            .with_cycle(self.inner.name(), record)
            .with_pending_input(true)
            .with_last_action(format!("{}:{}", self.inner.name(), action));
        StageOutcome::suspend(update, messages)
    }

    async fn start(&self, ctx: &StageContext, state: &ExecutionState) -> Result<StageOutcome, StageError> {
        let name = self.inner.name();
        let proposed = self.inner.propose(ctx, state).await?;
        let mut record = CycleRecord::default();

        if !state.hitl_enabled(name, self.inner.hitl_default()) {
            debug!(stage = %name, "Human review disabled, accepting first proposal");
            return Ok(self.finalize(state, record, &proposed.proposal, proposed.update, "auto_accepted"));
        }

        record.history.push(FeedbackMessage::assistant(proposed.proposal.clone()));
        Ok(self.suspend(record, &proposed.proposal, None, proposed.update, "proposed"))
    }

    async fn revise(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        record: CycleRecord,
        current: String,
        feedback: String,
    ) -> Result<StageOutcome, StageError> {
        let name = self.inner.name();
        debug!(stage = %name, phase = %CyclePhase::Revising, round = record.rounds + 1, "Revising proposal");

        let mut history = record.history.clone();
        history.push(FeedbackMessage::human(feedback));

        let response = ctx.complete(self.inner.revision_request(state, &history)).await?;
        let revision = self.inner.parse_revision(&response)?;

        let revised = match self.inner.apply_revision(ctx, state, &current, &revision).await {
            Ok(revised) => revised,
            Err(err) => {
                info!(stage = %name, error = %err, "Revision could not be applied");
                let messages = vec![format!(
                    "I couldn't apply that change: {err}. Please quote the passage more precisely."
                )];
                return Ok(StageOutcome::suspend(StateUpdate::new(), messages));
            }
        };

        let mut record = record;
        record.history = history;
        record.rounds += 1;

        if self.inner.is_approved(&revision) {
            return Ok(self.finalize(state, record, &revised.proposal, revised.update, "finalized"));
        }

        record.history.push(FeedbackMessage::assistant(revised.proposal.clone()));
        Ok(self.suspend(record, &revised.proposal, revision.reply.clone(), revised.update, "revised"))
    }
}

#[async_trait]
impl<F: FeedbackStage> Stage for FeedbackCycle<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn label(&self) -> &str {
        self.inner.label()
    }

    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        let record = state.cycle(self.inner.name()).cloned().unwrap_or_default();

        let awaiting = record.phase == CyclePhase::AwaitingFeedback && !record.finalized;
        let (input, current) = match (input, record.proposal.clone()) {
            (Some(input), Some(current)) if awaiting => (input, current),
            _ => return self.start(ctx, state).await,
        };

        match input {
            HumanInput::Approve => Ok(self.finalize(state, record, &current, StateUpdate::new(), "approved")),
            HumanInput::Skip => {
                let mut record = record;
                record.finalized = true;
                record.phase = CyclePhase::Initial;
                let skipped = self.inner.skip(state);
                Ok(self.exit(state, record, skipped, "skipped"))
            }
            HumanInput::Revise(feedback) => self.revise(ctx, state, record, current, feedback).await,
        }
    }
}
