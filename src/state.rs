//! Mutable per-run bookkeeping, owned exclusively by the engine.
//!
//! State is created when a run begins, mutated only through the methods
//! here, and dropped when the run terminates. A restart-new-session
//! transition discards the old state before a fresh one is created.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Execution bookkeeping for one recipe run inside one session.
#[derive(Debug, Clone)]
pub struct ExecutionState {
    recipe_id: String,
    current_step: String,
    step_count: u32,
    visit_counts: HashMap<String, u32>,
    retry_counts: HashMap<String, u32>,
    started_at: Instant,
    session_created: bool,
}

impl ExecutionState {
    /// Begin a run at the recipe's initial step. The initial step counts as
    /// step one and as its own first visit.
    pub fn new(recipe_id: &str, initial_step: &str) -> Self {
        let mut visit_counts = HashMap::new();
        visit_counts.insert(initial_step.to_string(), 1);
        Self {
            recipe_id: recipe_id.to_string(),
            current_step: initial_step.to_string(),
            step_count: 1,
            visit_counts,
            retry_counts: HashMap::new(),
            started_at: Instant::now(),
            session_created: false,
        }
    }

    pub fn recipe_id(&self) -> &str {
        &self.recipe_id
    }

    pub fn current_step(&self) -> &str {
        &self.current_step
    }

    /// Total steps taken, counting the initial step. Monotonically increasing.
    pub fn step_count(&self) -> u32 {
        self.step_count
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Whether the backend has created the session for this run yet.
    pub fn session_created(&self) -> bool {
        self.session_created
    }

    pub fn mark_session_created(&mut self) {
        self.session_created = true;
    }

    pub fn visit_count(&self, step: &str) -> u32 {
        self.visit_counts.get(step).copied().unwrap_or(0)
    }

    pub fn retry_count(&self, step: &str) -> u32 {
        self.retry_counts.get(step).copied().unwrap_or(0)
    }

    pub fn increment_retry(&mut self, step: &str) {
        *self.retry_counts.entry(step.to_string()).or_insert(0) += 1;
    }

    /// Move to `next_step`: update the current step, bump the step count,
    /// record the visit, and clear the retry counter for the fresh visit.
    pub fn transition_to(&mut self, next_step: &str) {
        self.current_step = next_step.to_string();
        self.step_count += 1;
        *self.visit_counts.entry(next_step.to_string()).or_insert(0) += 1;
        self.retry_counts.insert(next_step.to_string(), 0);
    }

    /// Snapshot of per-step visit counters, in step-name order.
    pub fn visit_snapshot(&self) -> BTreeMap<String, u32> {
        self.visit_counts
            .iter()
            .map(|(step, count)| (step.clone(), *count))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initializes_with_initial_step_visited() {
        let state = ExecutionState::new("test-recipe", "step-a");

        assert_eq!(state.recipe_id(), "test-recipe");
        assert_eq!(state.current_step(), "step-a");
        assert_eq!(state.step_count(), 1);
        assert_eq!(state.visit_count("step-a"), 1);
        assert_eq!(state.visit_count("step-b"), 0);
        assert!(!state.session_created());
    }

    #[test]
    fn transition_updates_state() {
        let mut state = ExecutionState::new("test-recipe", "step-a");

        state.transition_to("step-b");

        assert_eq!(state.current_step(), "step-b");
        assert_eq!(state.step_count(), 2);
        assert_eq!(state.visit_count("step-a"), 1);
        assert_eq!(state.visit_count("step-b"), 1);
    }

    #[test]
    fn tracks_multiple_visits_to_same_step() {
        let mut state = ExecutionState::new("test-recipe", "review");

        state.transition_to("fix");
        state.transition_to("review");

        assert_eq!(state.visit_count("review"), 2);
        assert_eq!(state.step_count(), 3);
    }

    #[test]
    fn retry_count_resets_on_fresh_visit() {
        let mut state = ExecutionState::new("test-recipe", "step-a");

        state.increment_retry("step-a");
        assert_eq!(state.retry_count("step-a"), 1);

        state.transition_to("step-b");
        state.transition_to("step-a");
        assert_eq!(state.retry_count("step-a"), 0);
    }

    #[test]
    fn session_created_flag() {
        let mut state = ExecutionState::new("test-recipe", "step-a");

        assert!(!state.session_created());
        state.mark_session_created();
        assert!(state.session_created());
    }

    #[test]
    fn visit_snapshot_is_ordered() {
        let mut state = ExecutionState::new("r", "b-step");
        state.transition_to("a-step");

        let snapshot = state.visit_snapshot();
        assert_eq!(
            snapshot.keys().collect::<Vec<_>>(),
            vec!["a-step", "b-step"]
        );
    }
}
