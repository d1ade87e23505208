use async_trait::async_trait;
use studyflow_core::{
    ExecutionState, HumanInput, Stage, StageContext, StageError, StageOutcome, StateUpdate, END,
};
use tracing::info;

use super::PUBLISH;

/// Last stage; the executor exports artifacts once the thread reaches the end.
pub struct Publish;

#[async_trait]
impl Stage for Publish {
    fn name(&self) -> &str {
        PUBLISH
    }

    fn label(&self) -> &str {
        "Saving your notes"
    }

    async fn run(
        &self,
        ctx: &StageContext,
        state: &ExecutionState,
        _input: Option<HumanInput>,
    ) -> Result<StageOutcome, StageError> {
        info!(
            thread_id = %ctx.thread_id,
            answered = state.qa_pairs().iter().filter(|p| !p.failed).count(),
            edits = state.edit_count,
            "Publishing study document"
        );
        Ok(StageOutcome::goto(
            END,
            StateUpdate::new().with_last_action(format!("{PUBLISH}:done")),
        ))
    }
}
