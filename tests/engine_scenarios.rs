//! End-to-end orchestration scenarios driven through a scripted backend.
//!
//! Each test wires a recipe and a queue of agent responses, runs the engine
//! to termination, and checks the final status, the exit-relevant
//! termination kind, and the exact sequence of prompts the backend saw.

use std::collections::BTreeMap;

use agent_recipes::engine::{Engine, EngineError, EngineOptions, Termination};
use agent_recipes::model::{Guardrails, Recipe};
use agent_recipes::test_support::{exit, next, recipe, restart, step, ScriptedBackend};

fn recipes(recipe: Recipe) -> BTreeMap<String, Recipe> {
    BTreeMap::from([(recipe.id.clone(), recipe)])
}

fn review_and_commit() -> Recipe {
    recipe(
        "review-and-commit",
        "code-review",
        vec![
            (
                "code-review",
                step(
                    "Review the uncommitted changes.",
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
                    "Fix the issues found by the review.",
                    vec![
                        ("complete", next("code-review")),
                        ("other", exit("user-provided-other")),
                    ],
                ),
            ),
            (
                "commit",
                step(
                    "Commit the changes.",
                    vec![
                        ("committed", exit("changes-committed")),
                        ("other", exit("user-provided-other")),
                    ],
                ),
            ),
        ],
    )
}

/// Scenario A: a happy-path run through review then commit.
#[test]
fn happy_path_three_step_run() {
    let recipes = recipes(review_and_commit());
    let backend = ScriptedBackend::replying(&[
        "Everything looks good.\n\n{\"outcome\": \"no-issues\"}",
        "done. {\"outcome\": \"committed\"}",
    ]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("review-and-commit").expect("run");

    assert_eq!(report.final_status, "changes-committed");
    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.steps_taken, 2);
    assert_eq!(report.step_visits.get("code-review"), Some(&1));
    assert_eq!(report.step_visits.get("commit"), Some(&1));
    assert_eq!(report.restarts, 0);

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].is_new_session);
    assert!(!calls[1].is_new_session);
    assert_eq!(calls[0].session_id, calls[1].session_id);
    assert!(calls[0].prompt.starts_with("Review the uncommitted changes."));
    assert!(calls[0]
        .prompt
        .contains("End your response with one of these JSON blocks"));
}

/// Scenario B: a review/fix cycle is stopped by the per-step visit guardrail.
#[test]
fn review_fix_loop_is_bounded_by_visit_guardrail() {
    let mut cyclic = review_and_commit();
    cyclic.guardrails = Guardrails {
        max_step_visits: 3,
        ..Guardrails::default()
    };
    let recipes = recipes(cyclic);

    // The agent always finds issues and always claims the fix is complete:
    // code-review(1) fix(1) code-review(2) fix(2) code-review(3) fix(3),
    // then the fourth visit to code-review would exceed the guardrail.
    let backend = ScriptedBackend::replying(&[
        "{\"outcome\": \"issues-found\"}",
        "{\"outcome\": \"complete\"}",
        "{\"outcome\": \"issues-found\"}",
        "{\"outcome\": \"complete\"}",
        "{\"outcome\": \"issues-found\"}",
        "{\"outcome\": \"complete\"}",
    ]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("review-and-commit").expect("run");

    assert_eq!(report.final_status, "max-step-visits-exceeded:code-review");
    assert_eq!(report.termination, Termination::GuardrailTriggered);
    assert_eq!(report.step_visits.get("code-review"), Some(&3));
    assert_eq!(report.step_visits.get("fix"), Some(&3));
    assert_eq!(backend.calls().len(), 6);
}

fn single_step() -> Recipe {
    recipe(
        "one-step",
        "work",
        vec![(
            "work",
            step(
                "Do the work.",
                vec![("done", exit("done")), ("other", exit("user-provided-other"))],
            ),
        )],
    )
}

/// Scenario C: the reminder recovers a missing outcome block.
#[test]
fn reminder_succeeds_after_missing_outcome() {
    let recipes = recipes(single_step());
    let backend = ScriptedBackend::replying(&["ok", "{\"outcome\":\"done\"}"]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("one-step").expect("run");

    assert_eq!(report.final_status, "done");
    assert_eq!(report.termination, Termination::Completed);

    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1]
        .prompt
        .contains("did not include the required JSON outcome block"));
    assert!(calls[1].prompt.contains("Error: No JSON block found in response"));
    assert!(!calls[1].is_new_session, "reminder stays in the session");
    assert_eq!(calls[0].session_id, calls[1].session_id);
}

/// Scenario D: a failed reminder ends the run as an orchestration error.
#[test]
fn reminder_failure_is_an_orchestration_error() {
    let recipes = recipes(single_step());
    let backend = ScriptedBackend::replying(&["ok", "still no json"]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("one-step").expect("run");

    assert_eq!(report.final_status, "orchestration-error");
    assert_eq!(report.termination, Termination::OrchestrationError);
    assert_eq!(backend.calls().len(), 2, "exactly one reminder per visit");
}

fn implement_and_review_all() -> Recipe {
    recipe(
        "implement-and-review-all",
        "implement",
        vec![
            (
                "implement",
                step(
                    "Pick up the next open task and implement it.",
                    vec![
                        ("complete", next("commit")),
                        ("no-tasks", exit("no-tasks")),
                        ("other", exit("user-provided-other")),
                    ],
                ),
            ),
            (
                "commit",
                step(
                    "Commit the implementation.",
                    vec![
                        ("committed", restart("implement-and-review-all")),
                        ("other", exit("user-provided-other")),
                    ],
                ),
            ),
        ],
    )
}

/// Scenario E: restart-new-session loops until the agent reports no tasks.
#[test]
fn restart_new_session_loops_until_no_tasks() {
    let recipes = recipes(implement_and_review_all());
    let backend = ScriptedBackend::replying(&[
        "{\"outcome\": \"complete\"}",
        "first commit. {\"outcome\": \"committed\"}",
        "{\"outcome\": \"complete\"}",
        "second commit. {\"outcome\": \"committed\"}",
        "{\"outcome\": \"no-tasks\"}",
    ]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("implement-and-review-all").expect("run");

    assert_eq!(report.final_status, "no-tasks");
    assert_eq!(report.termination, Termination::Completed);
    assert_eq!(report.restarts, 2);
    assert_eq!(report.session_ids.len(), 3);

    // Three distinct sessions, each starting fresh.
    let calls = backend.calls();
    assert_eq!(calls.len(), 5);
    let new_session_flags: Vec<bool> = calls.iter().map(|c| c.is_new_session).collect();
    assert_eq!(new_session_flags, vec![true, false, true, false, true]);
    assert_ne!(calls[0].session_id, calls[2].session_id);
    assert_ne!(calls[2].session_id, calls[4].session_id);
    assert_ne!(calls[0].session_id, calls[4].session_id);
    assert_eq!(calls[0].session_id, calls[1].session_id);
    assert_eq!(calls[2].session_id, calls[3].session_id);
    let commits = calls
        .iter()
        .filter(|c| c.prompt.starts_with("Commit the implementation."))
        .count();
    assert_eq!(commits, 2);
}

/// Scenario F: a broken recipe is refused before any agent invocation.
#[test]
fn validator_refuses_broken_recipe() {
    let mut broken = recipe(
        "broken",
        "start",
        vec![("start", step("Go.", vec![("done", next("missing"))]))],
    );
    broken.initial_step = "missing".to_string();
    let recipes = recipes(broken);

    let backend = ScriptedBackend::replying(&[]);
    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let err = engine.run("broken").expect_err("must refuse");

    match err {
        EngineError::Validation { errors, .. } => {
            assert!(errors.len() >= 2);
            assert!(errors.iter().any(|e| e.contains("Initial step not found")));
            assert!(errors
                .iter()
                .any(|e| e.contains("nextStep 'missing' not found")));
            assert_ne!(errors[0], errors[1]);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(backend.calls().is_empty());
}

/// The restart cap turns one more restart into a guardrail stop.
#[test]
fn max_restarts_cap_is_enforced() {
    let recipes = recipes(implement_and_review_all());
    let backend = ScriptedBackend::replying(&[
        "{\"outcome\": \"complete\"}",
        "{\"outcome\": \"committed\"}",
        "{\"outcome\": \"complete\"}",
        "{\"outcome\": \"committed\"}",
    ]);

    let options = EngineOptions {
        max_restarts: Some(1),
        ..EngineOptions::default()
    };
    let engine = Engine::new(&backend, &recipes, options);
    let report = engine.run("implement-and-review-all").expect("run");

    assert_eq!(report.final_status, "max-restarts-exceeded");
    assert_eq!(report.termination, Termination::GuardrailTriggered);
    assert_eq!(report.restarts, 1);
    // First run plus exactly one restarted run reached the backend.
    assert_eq!(backend.calls().len(), 4);
}

/// A restart cap of zero forbids any restart at all; the initial run is free.
#[test]
fn zero_restart_cap_forbids_the_first_restart() {
    let recipes = recipes(implement_and_review_all());
    let backend = ScriptedBackend::replying(&[
        "{\"outcome\": \"complete\"}",
        "{\"outcome\": \"committed\"}",
    ]);

    let options = EngineOptions {
        max_restarts: Some(0),
        ..EngineOptions::default()
    };
    let engine = Engine::new(&backend, &recipes, options);
    let report = engine.run("implement-and-review-all").expect("run");

    assert_eq!(report.final_status, "max-restarts-exceeded");
    assert_eq!(report.restarts, 0);
    assert_eq!(backend.calls().len(), 2);
}

/// An outcome outside the declared set never transitions; it goes through
/// the reminder path instead.
#[test]
fn undeclared_outcome_cannot_cause_a_transition() {
    let recipes = recipes(single_step());
    let backend = ScriptedBackend::replying(&[
        "{\"outcome\": \"totally-made-up\"}",
        "{\"outcome\": \"done\"}",
    ]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("one-step").expect("run");

    assert_eq!(report.final_status, "done");
    let calls = backend.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[1].prompt.contains("not in valid outcomes"));
}

/// The reminder allowance is per visit: a step revisited after a successful
/// reminder gets a fresh reminder on its next visit.
#[test]
fn reminder_allowance_resets_on_each_fresh_visit() {
    let looping = recipe(
        "loop-twice",
        "work",
        vec![
            (
                "work",
                step(
                    "Work.",
                    vec![("again", next("check")), ("done", exit("all-done"))],
                ),
            ),
            ("check", step("Check.", vec![("back", next("work"))])),
        ],
    );
    let recipes = recipes(looping);

    let backend = ScriptedBackend::replying(&[
        "no block yet",                // work visit 1, extraction fails
        "{\"outcome\": \"again\"}",    // reminder recovers
        "{\"outcome\": \"back\"}",     // check
        "hmm",                         // work visit 2, fails again
        "{\"outcome\": \"done\"}",     // second visit gets its own reminder
    ]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("loop-twice").expect("run");

    assert_eq!(report.final_status, "all-done");
    assert_eq!(backend.calls().len(), 5);
    assert_eq!(report.step_visits.get("work"), Some(&2));
}

/// Exit transitions skip guardrail checks even when limits are exhausted.
#[test]
fn exit_transitions_are_not_guardrail_checked() {
    let mut tight = single_step();
    tight.guardrails = Guardrails {
        max_step_visits: 1,
        max_total_steps: 1,
        ..Guardrails::default()
    };
    let recipes = recipes(tight);
    let backend = ScriptedBackend::replying(&["{\"outcome\": \"done\"}"]);

    let engine = Engine::new(&backend, &recipes, EngineOptions::default());
    let report = engine.run("one-step").expect("run");

    assert_eq!(report.final_status, "done");
    assert_eq!(report.termination, Termination::Completed);
}
