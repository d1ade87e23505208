use async_trait::async_trait;
use studyflow_core::{
    CompletionRequest, ExecutionState, FeedbackStage, PromptMessage, StateUpdate, Transition,
};

use super::{EXPLAIN, PROPOSE_QUESTIONS};
use crate::prompts;

/// Writes the explanation; reviewable when human review is on.
pub struct Explain {
    hitl_default: bool,
}

impl Explain {
    pub fn new(hitl_default: bool) -> Self {
        Self { hitl_default }
    }
}

#[async_trait]
impl FeedbackStage for Explain {
    fn name(&self) -> &str {
        EXPLAIN
    }

    fn label(&self) -> &str {
        "Explaining the concept"
    }

    fn hitl_default(&self) -> bool {
        self.hitl_default
    }

    fn instructions(&self) -> Option<String> {
        Some("Here's an explanation. Reply `approve` to continue or tell me what to change.".to_string())
    }

    fn proposal_request(&self, state: &ExecutionState) -> CompletionRequest {
        CompletionRequest::new(
            format!("{EXPLAIN}.proposal"),
            vec![
                PromptMessage::system(prompts::EXPLAIN_SYSTEM),
                PromptMessage::user(prompts::subject(state)),
            ],
        )
    }

    fn revision_prompt(&self, state: &ExecutionState) -> String {
        format!("{}\n\nQuestion:\n{}", prompts::EXPLAIN_REVISION, prompts::subject(state))
    }

    fn accept(&self, _state: &ExecutionState, proposal: &str) -> StateUpdate {
        StateUpdate::new().with_explanation(proposal)
    }

    fn next(&self, _state: &ExecutionState, _accepted: &StateUpdate) -> Transition {
        Transition::Stage(PROPOSE_QUESTIONS.to_string())
    }
}
