//! Prompt text for the study pipeline.

use studyflow_core::ExecutionState;

pub const RECOGNIZE_SYSTEM: &str = "You transcribe study material. Write out all text, formulas and \
diagram labels visible in the images, in reading order. Use Markdown and LaTeX for formulas. \
Do not explain or solve anything.";

pub const EXPLAIN_SYSTEM: &str = "You are a patient tutor. Explain the student's question clearly \
and correctly, building from intuition to the precise idea. Use Markdown. Keep it under 400 words.";

pub const EXPLAIN_REVISION: &str = "You are revising an explanation for a student. Read their \
feedback and rewrite the explanation accordingly. Set decision to \"finalize\" only when the \
student is satisfied; otherwise \"continue\". Put the full revised explanation in proposal and \
a one-sentence note to the student in reply.";

pub const QUESTIONS_INSTRUCTIONS: &str = "Here are some follow-up questions I can answer to round \
out your notes. Reply `approve` to answer them all, `skip` to go straight to the study document, \
or tell me what to add, drop or change.";

pub const QUESTIONS_REVISION: &str = "You maintain a list of follow-up questions for a student. \
Apply their feedback to the list. Put the complete updated list in proposal, one question per \
line, without numbering. Set decision to \"finalize\" only when the student says the list is \
good; otherwise \"continue\". Add a one-sentence note in reply.";

pub const ANSWER_SYSTEM: &str = "You are a tutor answering one follow-up question for a student \
who has just read the explanation below. Answer concisely and accurately in Markdown.";

pub const SYNTHESIZE_SYSTEM: &str = "Write a self-contained study document in Markdown from the \
material below: a title, the core explanation, a section per follow-up question, and a short \
summary of key points. Do not invent facts beyond the material.";

pub const EDIT_INSTRUCTIONS: &str = "Here's your study document. Tell me what to change, quoting \
the passage you mean, or reply `approve` to save it.";

pub const EDIT_REVISION: &str = "You edit a Markdown study document with targeted replacements. \
For each change the student asks for, add an edit whose old_text is copied verbatim from the \
document and whose new_text replaces it. Keep old_text short but unique. Set decision to \
\"finalize\" only when the student is done; otherwise \"continue\". Add a one-sentence note in reply.";

/// Maximum questions requested from the model.
pub fn questions_system(max_questions: usize) -> String {
    format!(
        "Suggest up to {max_questions} follow-up questions that would deepen a student's \
         understanding of the topic below. Each must be answerable on its own in a paragraph. \
         Respond with JSON: {{\"questions\": [\"...\"]}}."
    )
}

/// The question plus any transcribed image text.
pub fn subject(state: &ExecutionState) -> String {
    match state.recognized_text.as_deref().filter(|t| !t.trim().is_empty()) {
        Some(recognized) => format!(
            "{}\n\nText from the uploaded images:\n{}",
            state.question, recognized
        ),
        None => state.question.clone(),
    }
}

/// Subject and explanation, as context for later stages.
pub fn explained_subject(state: &ExecutionState) -> String {
    let mut context = format!("Question:\n{}", subject(state));
    if let Some(explanation) = &state.explanation {
        context.push_str("\n\nExplanation:\n");
        context.push_str(explanation);
    }
    context
}

/// Full material for the study document.
pub fn synthesis_material(state: &ExecutionState) -> String {
    let mut material = explained_subject(state);
    let mut answered = state.qa_pairs().iter().filter(|p| !p.failed).peekable();
    if answered.peek().is_some() {
        material.push_str("\n\nFollow-up questions:");
        for pair in answered {
            material.push_str(&format!("\n\n### {}\n{}", pair.question, pair.answer));
        }
    }
    material
}
