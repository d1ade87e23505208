use async_trait::async_trait;
use studyflow_core::{
    CompletionRequest, ExecutionState, HumanInput, PromptMessage, Stage, StageContext,
    StageError, StageOutcome, StateUpdate,
};
use tracing::debug;

use super::{EXPLAIN, RECOGNIZE_INPUT};
use crate::prompts;

/// Entry stage: transcribes uploaded images, if any.
pub struct RecognizeInput;

#[async_trait]
impl Stage for RecognizeInput {
    fn name(&self) -> &str {
        RECOGNIZE_INPUT
    }

    fn label(&self) -> &str {
        "Reading your question"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        _input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        if state.images.is_empty() {
            return Ok(StageOutcome::goto(EXPLAIN, StateUpdate::new()));
        }

        debug!(thread_id = %ctx.thread_id, images = state.images.len(), "Transcribing images");
        let request = CompletionRequest::new(
            RECOGNIZE_INPUT,
            vec![
                PromptMessage::system(prompts::RECOGNIZE_SYSTEM),
                PromptMessage::user(state.question.clone()).with_images(state.images.clone()),
            ],
        );
        let text = ctx.complete(request).await?.text.trim().to_string();

        Ok(StageOutcome::goto(
            EXPLAIN,
            StateUpdate::new().with_recognized_text(text),
        ))
    }
}
