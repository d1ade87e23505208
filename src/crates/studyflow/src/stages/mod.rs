//! The study pipeline
//!
//! ```text
//! recognize_input ──▶ explain ──▶ propose_questions ──┬──▶ answer_question × K ──┐
//!                     (review      (review on by      │                         ▼
//!                      optional)    default)          └────── skip ──────▶ synthesize
//!                                                                               │
//!                         __end__ ◀── publish ◀── edit_document ◀───────────────┘
//!                                                 (review optional)
//! ```

mod answer;
mod edit;
mod explain;
mod publish;
mod questions;
mod recognize;
mod synthesize;

pub use answer::AnswerQuestion;
pub use edit::EditDocument;
pub use explain::Explain;
pub use publish::Publish;
pub use questions::ProposeQuestions;
pub use recognize::RecognizeInput;
pub use synthesize::Synthesize;

use studyflow_core::{EngineError, FeedbackCycle, PipelineBuilder, StageRegistry};

use crate::config::StudyflowConfig;

pub const RECOGNIZE_INPUT: &str = "recognize_input";
pub const EXPLAIN: &str = "explain";
pub const PROPOSE_QUESTIONS: &str = "propose_questions";
pub const ANSWER_QUESTION: &str = "answer_question";
pub const SYNTHESIZE: &str = "synthesize";
pub const EDIT_DOCUMENT: &str = "edit_document";
pub const PUBLISH: &str = "publish";

/// Knobs the stages read at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub review_explanation: bool,
    pub review_questions: bool,
    pub review_document: bool,
    pub max_questions: usize,
    pub edit_threshold: f64,
}

impl PipelineOptions {
    pub fn from_config(config: &StudyflowConfig) -> Self {
        Self {
            review_explanation: config.hitl.explain,
            review_questions: config.hitl.propose_questions,
            review_document: config.hitl.edit_document,
            max_questions: config.execution.max_questions,
            edit_threshold: config.edit.threshold,
        }
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from_config(&StudyflowConfig::default())
    }
}

/// Register every stage and edge of the study pipeline.
pub fn build_pipeline(options: &PipelineOptions) -> Result<StageRegistry, EngineError> {
    let mut pipeline = PipelineBuilder::new();
    pipeline
        .add_stage(RecognizeInput)
        .add_stage(FeedbackCycle::new(Explain::new(options.review_explanation)))
        .add_stage(FeedbackCycle::new(ProposeQuestions::new(
            options.review_questions,
            options.max_questions,
        )))
        .add_worker(AnswerQuestion)
        .add_stage(Synthesize)
        .add_stage(FeedbackCycle::new(EditDocument::new(
            options.review_document,
            options.edit_threshold,
        )))
        .add_stage(Publish)
        .set_entry(RECOGNIZE_INPUT)
        .add_edge(RECOGNIZE_INPUT, EXPLAIN)
        .add_edge(EXPLAIN, PROPOSE_QUESTIONS)
        .add_edge(PROPOSE_QUESTIONS, SYNTHESIZE)
        .add_edge(SYNTHESIZE, EDIT_DOCUMENT)
        .add_edge(EDIT_DOCUMENT, PUBLISH)
        .add_finish(PUBLISH);
    pipeline.compile()
}
