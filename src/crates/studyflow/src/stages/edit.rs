use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use studyflow_core::feedback::edit_schema;
use studyflow_core::{
    fuzzy_replace, CompletionRequest, EditAudit, EditError, ExecutionState, FeedbackStage,
    PromptMessage, Revision, RevisionResult, StageContext, StageError, StateUpdate, Transition,
};
use tracing::info;

use super::{EDIT_DOCUMENT, PUBLISH};
use crate::prompts;

/// Lets the human polish the study document through targeted edits.
///
/// The model answers with `old_text`/`new_text` pairs that are located
/// with [`fuzzy_replace`]. A revision applies all of its edits or none:
/// if one cannot be located the document stays as it was and the human is
/// asked to quote the passage more precisely.
pub struct EditDocument {
    hitl_default: bool,
    threshold: f64,
}

impl EditDocument {
    pub fn new(hitl_default: bool, threshold: f64) -> Self {
        Self {
            hitl_default,
            threshold,
        }
    }

    fn current_document<'a>(&self, state: &'a ExecutionState) -> &'a str {
        state
            .cycle(EDIT_DOCUMENT)
            .filter(|record| !record.finalized)
            .and_then(|record| record.proposal.as_deref())
            .or(state.synthesis.as_deref())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FeedbackStage for EditDocument {
    fn name(&self) -> &str {
        EDIT_DOCUMENT
    }

    fn label(&self) -> &str {
        "Polishing the study document"
    }

    fn hitl_default(&self) -> bool {
        self.hitl_default
    }

    fn instructions(&self) -> Option<String> {
        Some(prompts::EDIT_INSTRUCTIONS.to_string())
    }

    /// Never sent: [`propose`](Self::propose) reuses the synthesized document.
    fn proposal_request(&self, state: &ExecutionState) -> CompletionRequest {
        CompletionRequest::new(
            format!("{EDIT_DOCUMENT}.proposal"),
            vec![PromptMessage::user(self.current_document(state))],
        )
    }

    /// The synthesized document is the first proposal; no completion call.
    async fn propose(&self, _ctx: &StageContext, state: &ExecutionState) -> Result<RevisionResult, StageError> {
        match state.synthesis.as_deref().map(str::trim).filter(|d| !d.is_empty()) {
            Some(document) => Ok(RevisionResult::new(document)),
            None => Err(StageError::invalid_response("there is no study document to edit")),
        }
    }

    fn revision_prompt(&self, state: &ExecutionState) -> String {
        format!(
            "{}\n\nCurrent document:\n{}",
            prompts::EDIT_REVISION,
            self.current_document(state)
        )
    }

    fn revision_schema(&self) -> Value {
        edit_schema()
    }

    async fn apply_revision(
        &self,
        ctx: &StageContext,
        _state: &ExecutionState,
        current: &str,
        revision: &Revision,
    ) -> Result<RevisionResult, EditError> {
        let mut document = current.to_string();
        let mut audits = Vec::with_capacity(revision.edits.len());

        for edit in &revision.edits {
            let outcome = fuzzy_replace(&document, &edit.old_text, &edit.new_text, self.threshold)?;
            audits.push(EditAudit {
                stage: EDIT_DOCUMENT.to_string(),
                old_text: edit.old_text.clone(),
                new_text: edit.new_text.clone(),
                matched: outcome.matched,
                distance: outcome.distance,
                similarity: outcome.similarity,
                at: Utc::now(),
            });
            document = outcome.document;
        }

        let applied = audits.len() as u32;
        for audit in audits {
            info!(
                thread_id = %ctx.thread_id,
                distance = audit.distance,
                similarity = audit.similarity,
                "Applied document edit"
            );
            ctx.record_edit(audit);
        }

        Ok(RevisionResult::new(document).with_update(StateUpdate::new().with_edits(applied)))
    }

    fn accept(&self, _state: &ExecutionState, proposal: &str) -> StateUpdate {
        StateUpdate::new().with_synthesis(proposal)
    }

    fn next(&self, _state: &ExecutionState, _accepted: &StateUpdate) -> Transition {
        Transition::Stage(PUBLISH.to_string())
    }
}
