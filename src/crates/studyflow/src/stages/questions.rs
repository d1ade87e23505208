use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use studyflow_core::{
    CompletionRequest, ExecutionState, FanOutRequest, FanOutUnit, FeedbackStage, PromptMessage,
    RevisionResult, StageContext, StageError, StateUpdate, Transition,
};

use super::{ANSWER_QUESTION, PROPOSE_QUESTIONS, SYNTHESIZE};
use crate::prompts;

#[derive(Debug, Deserialize)]
struct QuestionList {
    questions: Vec<String>,
}

/// Proposes follow-up questions; approval fans out one answer per question.
pub struct ProposeQuestions {
    hitl_default: bool,
    max_questions: usize,
}

impl ProposeQuestions {
    pub fn new(hitl_default: bool, max_questions: usize) -> Self {
        Self {
            hitl_default,
            max_questions: max_questions.max(1),
        }
    }

    /// One question per non-empty line, leading list markers removed.
    fn parse_lines(&self, proposal: &str) -> Vec<String> {
        proposal
            .lines()
            .map(strip_marker)
            .filter(|q| !q.is_empty())
            .map(str::to_string)
            .take(self.max_questions)
            .collect()
    }
}

fn strip_marker(line: &str) -> &str {
    let line = line.trim();
    let line = line
        .strip_prefix("- ")
        .or_else(|| line.strip_prefix("* "))
        .unwrap_or(line);
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    if digits > 0 {
        if let Some(rest) = line[digits..]
            .strip_prefix(". ")
            .or_else(|| line[digits..].strip_prefix(") "))
        {
            return rest.trim();
        }
    }
    line
}

#[async_trait]
impl FeedbackStage for ProposeQuestions {
    fn name(&self) -> &str {
        PROPOSE_QUESTIONS
    }

    fn label(&self) -> &str {
        "Choosing follow-up questions"
    }

    fn hitl_default(&self) -> bool {
        self.hitl_default
    }

    fn instructions(&self) -> Option<String> {
        Some(prompts::QUESTIONS_INSTRUCTIONS.to_string())
    }

    fn proposal_request(&self, state: &ExecutionState) -> CompletionRequest {
        CompletionRequest::new(
            format!("{PROPOSE_QUESTIONS}.proposal"),
            vec![
                PromptMessage::system(prompts::questions_system(self.max_questions)),
                PromptMessage::user(prompts::explained_subject(state)),
            ],
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "questions": { "type": "array", "items": { "type": "string" } }
            },
            "required": ["questions"],
            "additionalProperties": false
        }))
    }

    async fn propose(&self, ctx: &StageContext, state: &ExecutionState) -> Result<RevisionResult, StageError> {
        let response = ctx.complete(self.proposal_request(state)).await?;
        let list: QuestionList = response.parse()?;
        let questions = self.parse_lines(&list.questions.join("\n"));
        if questions.is_empty() {
            return Err(StageError::invalid_response("no follow-up questions were proposed"));
        }
        Ok(RevisionResult::new(questions.join("\n")))
    }

    fn revision_prompt(&self, state: &ExecutionState) -> String {
        format!(
            "{}\nKeep at most {} questions.\n\n{}",
            prompts::QUESTIONS_REVISION,
            self.max_questions,
            prompts::explained_subject(state)
        )
    }

    fn accept(&self, _state: &ExecutionState, proposal: &str) -> StateUpdate {
        StateUpdate::new().with_follow_up_questions(self.parse_lines(proposal))
    }

    fn skip(&self, _state: &ExecutionState) -> StateUpdate {
        StateUpdate::new().with_follow_up_questions(Vec::new())
    }

    fn next(&self, _state: &ExecutionState, accepted: &StateUpdate) -> Transition {
        let questions = accepted.follow_up_questions.clone().unwrap_or_default();
        if questions.is_empty() {
            return Transition::Stage(SYNTHESIZE.to_string());
        }

        let units = questions
            .into_iter()
            .enumerate()
            .map(|(i, question)| FanOutUnit::new(format!("q{}", i + 1), json!({ "question": question })))
            .collect();
        Transition::FanOut(FanOutRequest {
            worker: ANSWER_QUESTION.to_string(),
            units,
            then: SYNTHESIZE.to_string(),
        })
    }

    fn present(&self, proposal: &str) -> String {
        self.parse_lines(proposal)
            .iter()
            .enumerate()
            .map(|(i, q)| format!("{}. {}", i + 1, q))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_markers_are_stripped() {
        let stage = ProposeQuestions::new(true, 10);
        let lines = stage.parse_lines("1. What is osmosis?\n- Why does it matter?\n\n  3) How fast is it?\n");
        assert_eq!(
            lines,
            vec!["What is osmosis?", "Why does it matter?", "How fast is it?"]
        );
    }

    #[test]
    fn test_question_count_is_capped() {
        let stage = ProposeQuestions::new(true, 2);
        assert_eq!(stage.parse_lines("a\nb\nc").len(), 2);
    }

    #[test]
    fn test_accepted_questions_fan_out() {
        let stage = ProposeQuestions::new(true, 5);
        let state = ExecutionState::new("Explain osmosis", Vec::new());
        let accepted = stage.accept(&state, "What is tonicity?\nWhat is a semipermeable membrane?");

        match stage.next(&state, &accepted) {
            Transition::FanOut(request) => {
                assert_eq!(request.worker, ANSWER_QUESTION);
                assert_eq!(request.then, SYNTHESIZE);
                assert_eq!(request.units.len(), 2);
                assert_eq!(request.units[0].payload["question"], "What is tonicity?");
            }
            other => panic!("expected fan-out, got {other:?}"),
        }
    }

    #[test]
    fn test_skip_goes_straight_to_synthesis() {
        let stage = ProposeQuestions::new(true, 5);
        let state = ExecutionState::new("Explain osmosis", Vec::new());
        let skipped = stage.skip(&state);
        assert_eq!(
            stage.next(&state, &skipped),
            Transition::Stage(SYNTHESIZE.to_string())
        );
    }

    #[test]
    fn test_present_numbers_questions() {
        let stage = ProposeQuestions::new(true, 5);
        assert_eq!(stage.present("A?\nB?"), "1. A?\n2. B?");
    }
}
