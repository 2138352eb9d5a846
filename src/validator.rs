//! Structural validation of recipes before execution.
//!
//! Returns an ordered list of human-readable error messages; an empty list
//! means the recipe is safe to run. The engine refuses to execute a recipe
//! with any error.

use crate::model::{ModelTier, Recipe, Transition};

/// Validate a recipe definition.
///
/// Checks, in order: the initial step exists, the recipe-level model is a
/// known tier, and then per step (in step-map order): required fields,
/// outcome/transition coverage in both directions, transition targets and
/// payloads, and the step-level model tier.
pub fn validate(recipe: &Recipe) -> Vec<String> {
    let mut errors = Vec::new();

    if !recipe.steps.contains_key(&recipe.initial_step) {
        errors.push(format!(
            "Initial step not found in steps: {}",
            recipe.initial_step
        ));
    }

    if let Some(model) = &recipe.model {
        if ModelTier::parse(model).is_none() {
            errors.push(format!(
                "Invalid model '{}' at recipe level. Valid models: {}",
                model,
                ModelTier::NAMES.join(", ")
            ));
        }
    }

    for (step_name, step) in &recipe.steps {
        if step.prompt.trim().is_empty() {
            errors.push(format!("Step '{step_name}' has missing or empty prompt"));
        }
        if step.outcomes.is_empty() {
            errors.push(format!("Step '{step_name}' has missing or empty outcomes"));
        }

        for outcome_key in step.on_outcome.keys() {
            if !step.outcomes.contains(outcome_key) {
                errors.push(format!(
                    "Step '{step_name}': onOutcome key '{outcome_key}' not in outcomes {}",
                    outcome_list(step)
                ));
            }
        }

        for outcome in &step.outcomes {
            if !step.on_outcome.contains_key(outcome) {
                errors.push(format!(
                    "Step '{step_name}': outcome '{outcome}' has no onOutcome entry"
                ));
            }
        }

        for (outcome_key, transition) in &step.on_outcome {
            match transition {
                Transition::NextStep(target) => {
                    if !recipe.steps.contains_key(target) {
                        errors.push(format!(
                            "Step '{step_name}': nextStep '{target}' not found in steps"
                        ));
                    }
                }
                Transition::Exit(reason) => {
                    if reason.trim().is_empty() {
                        errors.push(format!(
                            "Step '{step_name}': exit transition for outcome '{outcome_key}' has empty reason"
                        ));
                    }
                }
                Transition::RestartNewSession(recipe_id) => {
                    if recipe_id.trim().is_empty() {
                        errors.push(format!(
                            "Step '{step_name}': restart-new-session transition has empty recipeId"
                        ));
                    }
                }
            }
        }

        if let Some(model) = &step.model {
            if ModelTier::parse(model).is_none() {
                errors.push(format!(
                    "Invalid model '{}' at step '{}'. Valid models: {}",
                    model,
                    step_name,
                    ModelTier::NAMES.join(", ")
                ));
            }
        }
    }

    errors
}

fn outcome_list(step: &crate::model::Step) -> String {
    format!(
        "[{}]",
        step.outcomes.iter().cloned().collect::<Vec<_>>().join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{exit, next, recipe, restart, step};

    #[test]
    fn valid_recipe_returns_no_errors() {
        let recipe = recipe(
            "test-recipe",
            "step-a",
            vec![(
                "step-a",
                step(
                    "Do something",
                    vec![("done", exit("completed")), ("other", exit("user-provided-other"))],
                ),
            )],
        );

        assert!(validate(&recipe).is_empty());
    }

    #[test]
    fn detects_missing_initial_step() {
        let mut broken = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", exit("completed"))]))],
        );
        broken.initial_step = "nonexistent".to_string();

        let errors = validate(&broken);
        assert!(errors.iter().any(|e| e.contains("Initial step not found")));
    }

    #[test]
    fn detects_invalid_next_step() {
        let recipe = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", next("nonexistent"))]))],
        );

        let errors = validate(&recipe);
        assert!(errors
            .iter()
            .any(|e| e.contains("nextStep 'nonexistent' not found")));
    }

    #[test]
    fn detects_invalid_step_model() {
        let mut bad = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", exit("completed"))]))],
        );
        bad.steps.get_mut("step-a").expect("step").model = Some("gpt-4".to_string());

        let errors = validate(&bad);
        assert!(errors
            .iter()
            .any(|e| e.contains("Invalid model 'gpt-4' at step 'step-a'")));
    }

    #[test]
    fn detects_invalid_recipe_level_model() {
        let mut bad = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", exit("completed"))]))],
        );
        bad.model = Some("gpt-4".to_string());

        let errors = validate(&bad);
        assert!(errors
            .iter()
            .any(|e| e.contains("Invalid model 'gpt-4' at recipe level")));
    }

    #[test]
    fn detects_outcome_without_on_outcome_entry() {
        let mut bad = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", exit("completed"))]))],
        );
        bad.steps
            .get_mut("step-a")
            .expect("step")
            .outcomes
            .insert("other".to_string());

        let errors = validate(&bad);
        assert!(errors
            .iter()
            .any(|e| e.contains("outcome 'other' has no onOutcome entry")));
    }

    #[test]
    fn detects_on_outcome_key_outside_outcome_set() {
        let mut bad = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", exit("completed"))]))],
        );
        bad.steps
            .get_mut("step-a")
            .expect("step")
            .on_outcome
            .insert("surprise".to_string(), exit("huh"));

        let errors = validate(&bad);
        assert!(errors
            .iter()
            .any(|e| e.contains("onOutcome key 'surprise' not in outcomes")));
    }

    #[test]
    fn detects_exit_with_empty_reason() {
        let recipe = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", exit(""))]))],
        );

        let errors = validate(&recipe);
        assert!(errors.iter().any(|e| e.contains("empty reason")));
    }

    #[test]
    fn detects_restart_with_empty_recipe_id() {
        let recipe = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", restart(""))]))],
        );

        let errors = validate(&recipe);
        assert!(errors.iter().any(|e| e.contains("empty recipeId")));
    }

    #[test]
    fn detects_blank_prompt_and_empty_outcomes() {
        let mut bad = recipe("test", "step-a", vec![("step-a", step("  ", vec![]))]);
        bad.steps.get_mut("step-a").expect("step").outcomes.clear();

        let errors = validate(&bad);
        assert!(errors
            .iter()
            .any(|e| e.contains("missing or empty prompt")));
        assert!(errors
            .iter()
            .any(|e| e.contains("missing or empty outcomes")));
    }

    #[test]
    fn multi_step_recipe_with_valid_transitions() {
        let recipe = recipe(
            "test",
            "review",
            vec![
                (
                    "review",
                    step(
                        "Review code",
                        vec![
                            ("no-issues", next("commit")),
                            ("issues-found", next("fix")),
                            ("other", exit("user-provided-other")),
                        ],
                    ),
                ),
                (
                    "fix",
                    step(
                        "Fix issues",
                        vec![
                            ("complete", next("review")),
                            ("other", exit("user-provided-other")),
                        ],
                    ),
                ),
                (
                    "commit",
                    step(
                        "Commit",
                        vec![
                            ("committed", exit("changes-committed")),
                            ("other", exit("user-provided-other")),
                        ],
                    ),
                ),
            ],
        );

        assert!(validate(&recipe).is_empty());
    }

    #[test]
    fn validation_is_idempotent() {
        let mut broken = recipe(
            "test",
            "step-a",
            vec![("step-a", step("Do something", vec![("done", next("missing"))]))],
        );
        broken.initial_step = "missing".to_string();

        let first = validate(&broken);
        let second = validate(&broken);
        assert_eq!(first, second);
        assert!(first.len() >= 2);
    }
}
