use async_trait::async_trait;
use studyflow_core::{
    CompletionRequest, ExecutionState, FanOutUnit, FanOutWorker, PromptMessage, QaPair,
    StageContext, StageError, StateUpdate,
};

use super::ANSWER_QUESTION;
use crate::prompts;

/// Fan-out body: answers one follow-up question.
pub struct AnswerQuestion;

fn question(unit: &FanOutUnit) -> &str {
    unit.payload
        .get("question")
        .and_then(|q| q.as_str())
        .unwrap_or(&unit.key)
}

#[async_trait]
impl FanOutWorker for AnswerQuestion {
    fn name(&self) -> &str {
        ANSWER_QUESTION
    }

    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        unit: &FanOutUnit,
    ) -> Result<StateUpdate, StageError> {
        let question = question(unit);
        let request = CompletionRequest::new(
            ANSWER_QUESTION,
            vec![
                PromptMessage::system(format!(
                    "{}\n\n{}",
                    prompts::ANSWER_SYSTEM,
                    prompts::explained_subject(state)
                )),
                PromptMessage::user(question),
            ],
        );

        let answer = ctx.complete(request).await?.text.trim().to_string();
        if answer.is_empty() {
            return Err(StageError::invalid_response("empty answer"));
        }
        Ok(StateUpdate::new().with_qa_pair(QaPair::answered(question, answer)))
    }

    fn on_error(&self, unit: &FanOutUnit, error: &str) -> StateUpdate {
        StateUpdate::new().with_qa_pair(QaPair::failed(question(unit), error))
    }
}
