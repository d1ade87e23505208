use async_trait::async_trait;
use studyflow_core::{
    CompletionRequest, ExecutionState, HumanInput, PromptMessage, Stage, StageContext,
    StageError, StageOutcome, StateUpdate,
};

use super::{EDIT_DOCUMENT, SYNTHESIZE};
use crate::prompts;

/// Joins the explanation and answers into one study document.
pub struct Synthesize;

#[async_trait]
impl Stage for Synthesize {
    fn name(&self) -> &str {
        SYNTHESIZE
    }

    fn label(&self) -> &str {
        "Writing the study document"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        _input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        let request = CompletionRequest::new(
            SYNTHESIZE,
            vec![
                PromptMessage::system(prompts::SYNTHESIZE_SYSTEM),
                PromptMessage::user(prompts::synthesis_material(state)),
            ],
        );
        let document = ctx.complete(request).await?.text.trim().to_string();
        if document.is_empty() {
            return Err(StageError::invalid_response("empty study document"));
        }

        Ok(StageOutcome::goto(
            EDIT_DOCUMENT,
            StateUpdate::new().with_synthesis(document),
        ))
    }
}
