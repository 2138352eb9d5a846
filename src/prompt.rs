//! Prompt assembly for steps and extraction-failure reminders.
//!
//! The output format is a parser contract: given identical steps the
//! functions here produce byte-identical text, with non-"other" outcomes in
//! lexicographic order and "other" always last. The engine adds no system
//! preamble or other out-of-band context.

use crate::model::Step;

/// Build the full prompt for a step: the step's instruction text, a blank
/// line, then the outcome-format block.
pub fn build_step_prompt(step: &Step) -> String {
    format!(
        "{}\n\nEnd your response with one of these JSON blocks on the last line:\n\n{}",
        step.prompt,
        outcome_examples(step)
    )
}

/// Build the in-session reminder sent after a failed outcome extraction.
pub fn build_reminder_prompt(step: &Step, error_details: &str) -> String {
    format!(
        "Your previous response did not include the required JSON outcome block.\n\
         Please respond now with ONLY the JSON outcome on a single line.\n\n\
         Error: {error_details}\n\n\
         Valid responses:\n\n\
         {}\n\n\
         Respond with ONLY the JSON block, nothing else.",
        outcome_examples(step)
    )
}

fn outcome_examples(step: &Step) -> String {
    let mut examples = String::new();
    // BTreeSet iteration is already lexicographic.
    for outcome in step.outcomes.iter().filter(|o| o.as_str() != "other") {
        examples.push_str(&format!("{{\"outcome\": \"{outcome}\"}}\n"));
    }
    if step.outcomes.contains("other") {
        examples.push_str("{\"outcome\": \"other\", \"otherDescription\": \"<brief description>\"}");
    }
    examples
}
