//! Outcome extraction from agent response text.
//!
//! The algorithm runs in a fixed order: find a `{...}` candidate line within
//! the last five lines, and only then strip markdown fences from that single
//! line. Pre-stripping fences from the whole response would corrupt
//! multi-line fenced code the agent may have quoted in its narration.

use std::collections::BTreeSet;

use serde_json::Value;

use crate::model::OutcomeResult;

/// How many trailing lines are searched for the JSON outcome block.
const TAIL_WINDOW: usize = 5;

/// Extract and validate an outcome from the agent's response text.
pub fn extract(response_text: &str, valid_outcomes: &BTreeSet<String>) -> OutcomeResult {
    let lines: Vec<&str> = response_text.split('\n').collect();
    let window_start = lines.len().saturating_sub(TAIL_WINDOW);
    let candidate = lines[window_start..]
        .iter()
        .rev()
        .map(|line| line.trim())
        .find(|line| line.starts_with('{') && line.ends_with('}'));

    let Some(candidate) = candidate else {
        return OutcomeResult::Failure {
            error: "No JSON block found in response".to_string(),
            malformed: None,
        };
    };

    let candidate = strip_fences(candidate);

    let parsed: Value = match serde_json::from_str(candidate) {
        Ok(value) => value,
        Err(err) => {
            return OutcomeResult::Failure {
                error: format!("Invalid JSON: {err}"),
                malformed: Some(candidate.to_string()),
            };
        }
    };

    let Some(outcome) = parsed.get("outcome").and_then(Value::as_str) else {
        return OutcomeResult::Failure {
            error: "Missing or non-string 'outcome' field".to_string(),
            malformed: Some(candidate.to_string()),
        };
    };

    if !valid_outcomes.contains(outcome) {
        return OutcomeResult::Failure {
            error: format!(
                "Outcome '{outcome}' not in valid outcomes: [{}]",
                valid_outcomes.iter().cloned().collect::<Vec<_>>().join(", ")
            ),
            malformed: Some(candidate.to_string()),
        };
    }

    let description = if outcome == "other" {
        match parsed.get("otherDescription").and_then(Value::as_str) {
            Some(description) if !description.trim().is_empty() => Some(description.to_string()),
            _ => {
                return OutcomeResult::Failure {
                    error: "Outcome 'other' requires non-empty 'otherDescription' field"
                        .to_string(),
                    malformed: Some(candidate.to_string()),
                };
            }
        }
    } else {
        None
    };

    OutcomeResult::Success {
        outcome: outcome.to_string(),
        description,
    }
}

/// Strip a leading ```` ```json ```` or ```` ``` ```` and a trailing
/// ```` ``` ```` from a single candidate line. Fences can end up on the
/// candidate line when the agent puts braces on the same line as a fence.
fn strip_fences(candidate: &str) -> &str {
    let stripped = candidate
        .strip_prefix("```json")
        .or_else(|| candidate.strip_prefix("```"))
        .unwrap_or(candidate);
    stripped.strip_suffix("```").unwrap_or(stripped).trim()
}
