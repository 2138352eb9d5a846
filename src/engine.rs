//! The orchestration engine: executes one recipe run end to end.
//!
//! The engine is the sole authority over control flow. The agent never
//! chooses the next step; only its outcome token is consulted, and an
//! outcome outside the step's declared set cannot cause a transition.
//! Each step visit gets at most one reminder after a failed extraction.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::backend::{
    AgentBackend, AgentResponse, BackendError, SendPromptRequest, DEFAULT_STEP_TIMEOUT,
};
use crate::extractor;
use crate::model::{Guardrails, ModelTier, OutcomeResult, Recipe, Transition};
use crate::prompt;
use crate::session::SessionLocks;
use crate::state::ExecutionState;
use crate::validator;

/// Final status reported when outcome extraction fails twice on one visit.
pub const ORCHESTRATION_ERROR_STATUS: &str = "orchestration-error";

/// Per-run options, assembled by the CLI from flags and settings.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Working directory handed to the agent process.
    pub working_dir: PathBuf,
    /// Model tier override: stronger than the recipe default, weaker than a
    /// per-step override.
    pub model_override: Option<ModelTier>,
    /// Override for the recipe's `maxStepVisits` guardrail.
    pub max_visits_override: Option<u32>,
    /// Override for the recipe's `maxTotalSteps` guardrail.
    pub max_steps_override: Option<u32>,
    /// Cap on restart-new-session cycles; `None` means unlimited. The
    /// initial run is not counted.
    pub max_restarts: Option<u32>,
    /// Deadline per agent invocation.
    pub step_timeout: Duration,
    /// Extra environment for the agent process (e.g. to isolate worktrees).
    pub env_overrides: BTreeMap<String, String>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            model_override: None,
            max_visits_override: None,
            max_steps_override: None,
            max_restarts: None,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            env_overrides: BTreeMap::new(),
        }
    }
}

/// How a run ended, for exit-code mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// An exit transition was reached; the final status is its reason.
    Completed,
    /// Outcome extraction failed twice on the same step visit.
    OrchestrationError,
    /// A guardrail stopped the run; the final status encodes which.
    GuardrailTriggered,
}

/// Summary of a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Recipe the final session was executing.
    pub recipe_id: String,
    /// Exit reason verbatim, or an encoded guardrail/orchestration status.
    pub final_status: String,
    pub termination: Termination,
    /// Step count of the final session, counting its initial step.
    pub steps_taken: u32,
    /// Per-step visit counters of the final session.
    pub step_visits: BTreeMap<String, u32>,
    /// Restart-new-session cycles taken.
    pub restarts: u32,
    /// Every session identifier used, in order.
    pub session_ids: Vec<String>,
}

/// Run-fatal errors. Everything here aborts the run; the CLI maps each
/// variant to its exit code.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("recipe '{recipe_id}' failed validation:\n- {}", .errors.join("\n- "))]
    Validation {
        recipe_id: String,
        errors: Vec<String>,
    },

    #[error("unknown recipe '{0}'")]
    UnknownRecipe(String),

    #[error("recipe '{recipe_id}' has no step or transition for '{detail}'")]
    CorruptRecipe { recipe_id: String, detail: String },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

enum SessionEnd {
    Finished {
        termination: Termination,
        final_status: String,
    },
    Restart {
        target: String,
    },
}

struct SessionOutcome {
    end: SessionEnd,
    state: ExecutionState,
}

/// Drives recipes against one backend. Holds the session-lock registry;
/// locks are held for the full duration of a session and released through
/// guard drops on every exit path.
pub struct Engine<'a, B: AgentBackend> {
    backend: &'a B,
    recipes: &'a BTreeMap<String, Recipe>,
    options: EngineOptions,
    locks: SessionLocks,
}

impl<'a, B: AgentBackend> Engine<'a, B> {
    pub fn new(backend: &'a B, recipes: &'a BTreeMap<String, Recipe>, options: EngineOptions) -> Self {
        Self {
            backend,
            recipes,
            options,
            locks: SessionLocks::new(),
        }
    }

    /// Execute a recipe to termination, following restart-new-session
    /// transitions across fresh sessions.
    pub fn run(&self, recipe_id: &str) -> Result<RunReport, EngineError> {
        let mut validated = HashSet::new();
        let mut recipe = self.validated_recipe(recipe_id, &mut validated)?;
        let mut restarts = 0u32;
        let mut session_ids = Vec::new();

        loop {
            let session_id = Uuid::new_v4().to_string();
            session_ids.push(session_id.clone());
            let guard = self.locks.acquire(&session_id);
            info!(
                recipe_id = %recipe.id,
                session_id = %session_id,
                backend = self.backend.name(),
                "session started"
            );
            let outcome = self.run_session(recipe, &session_id);
            drop(guard);
            let outcome = outcome?;

            match outcome.end {
                SessionEnd::Finished {
                    termination,
                    final_status,
                } => {
                    return Ok(self.report(recipe, final_status, termination, &outcome.state, restarts, session_ids));
                }
                SessionEnd::Restart { target } => {
                    if let Some(cap) = self.options.max_restarts {
                        if restarts >= cap {
                            warn!(cap, "restart cap reached, stopping");
                            return Ok(self.report(
                                recipe,
                                "max-restarts-exceeded".to_string(),
                                Termination::GuardrailTriggered,
                                &outcome.state,
                                restarts,
                                session_ids,
                            ));
                        }
                    }
                    restarts += 1;
                    info!(target = %target, restarts, "restarting with a fresh session");
                    recipe = self.validated_recipe(&target, &mut validated)?;
                }
            }
        }
    }

    fn run_session(
        &self,
        recipe: &Recipe,
        session_id: &str,
    ) -> Result<SessionOutcome, EngineError> {
        let mut state = ExecutionState::new(&recipe.id, &recipe.initial_step);
        let guardrails = self.effective_guardrails(recipe);
        let recipe_tier = recipe.model.as_deref().and_then(ModelTier::parse);

        loop {
            let step_name = state.current_step().to_string();
            let step = recipe.steps.get(&step_name).ok_or_else(|| {
                EngineError::CorruptRecipe {
                    recipe_id: recipe.id.clone(),
                    detail: step_name.clone(),
                }
            })?;
            let tier = step
                .model
                .as_deref()
                .and_then(ModelTier::parse)
                .or(self.options.model_override)
                .or(recipe_tier);
            let model_id = tier.and_then(|tier| self.backend.resolve_model(tier));

            info!(
                step = %step_name,
                visit = state.visit_count(&step_name),
                step_count = state.step_count(),
                model = model_id.as_deref().unwrap_or("default"),
                "step started"
            );

            let response = self.send(
                prompt::build_step_prompt(step),
                session_id,
                !state.session_created(),
                &model_id,
            )?;
            state.mark_session_created();
            log_usage(&response);

            let mut result = extractor::extract(&response.response_text, &step.outcomes);
            let retry_error = match &result {
                OutcomeResult::Failure { error, .. } if state.retry_count(&step_name) == 0 => {
                    Some(error.clone())
                }
                _ => None,
            };
            if let Some(error) = retry_error {
                warn!(step = %step_name, error = %error, "extraction failed, sending reminder");
                state.increment_retry(&step_name);
                let reminder = prompt::build_reminder_prompt(step, &error);
                let response = self.send(reminder, session_id, false, &model_id)?;
                log_usage(&response);
                result = extractor::extract(&response.response_text, &step.outcomes);
            }

            let (outcome, description) = match result {
                OutcomeResult::Success {
                    outcome,
                    description,
                } => (outcome, description),
                OutcomeResult::Failure { error, .. } => {
                    warn!(step = %step_name, error = %error, "extraction failed after reminder");
                    return Ok(SessionOutcome {
                        end: SessionEnd::Finished {
                            termination: Termination::OrchestrationError,
                            final_status: ORCHESTRATION_ERROR_STATUS.to_string(),
                        },
                        state,
                    });
                }
            };

            info!(step = %step_name, outcome = %outcome, "outcome extracted");
            if let Some(description) = &description {
                info!(step = %step_name, description = %description, "agent reported 'other'");
            }

            let transition = step.on_outcome.get(&outcome).ok_or_else(|| {
                EngineError::CorruptRecipe {
                    recipe_id: recipe.id.clone(),
                    detail: format!("{step_name}/{outcome}"),
                }
            })?;

            match transition {
                Transition::Exit(reason) => {
                    info!(reason = %reason, steps = state.step_count(), "run completed");
                    return Ok(SessionOutcome {
                        end: SessionEnd::Finished {
                            termination: Termination::Completed,
                            final_status: reason.clone(),
                        },
                        state,
                    });
                }
                Transition::NextStep(target) => {
                    if state.visit_count(target) + 1 > guardrails.max_step_visits {
                        warn!(step = %target, max = guardrails.max_step_visits, "per-step visit guardrail triggered");
                        return Ok(SessionOutcome {
                            end: SessionEnd::Finished {
                                termination: Termination::GuardrailTriggered,
                                final_status: format!("max-step-visits-exceeded:{target}"),
                            },
                            state,
                        });
                    }
                    if state.step_count() >= guardrails.max_total_steps {
                        warn!(max = guardrails.max_total_steps, "total step guardrail triggered");
                        return Ok(SessionOutcome {
                            end: SessionEnd::Finished {
                                termination: Termination::GuardrailTriggered,
                                final_status: "max-total-steps".to_string(),
                            },
                            state,
                        });
                    }
                    info!(from = %step_name, to = %target, "transition");
                    state.transition_to(target);
                }
                Transition::RestartNewSession(target) => {
                    return Ok(SessionOutcome {
                        end: SessionEnd::Restart {
                            target: target.clone(),
                        },
                        state,
                    });
                }
            }
        }
    }

    fn send(
        &self,
        prompt: String,
        session_id: &str,
        is_new_session: bool,
        model_id: &Option<String>,
    ) -> Result<AgentResponse, EngineError> {
        let request = SendPromptRequest {
            prompt,
            session_id: session_id.to_string(),
            is_new_session,
            working_dir: self.options.working_dir.clone(),
            model_id: model_id.clone(),
            env_overrides: self.options.env_overrides.clone(),
            timeout: self.options.step_timeout,
        };
        Ok(self.backend.send_prompt(&request)?)
    }

    fn validated_recipe(
        &self,
        recipe_id: &str,
        validated: &mut HashSet<String>,
    ) -> Result<&'a Recipe, EngineError> {
        let recipe = self
            .recipes
            .get(recipe_id)
            .ok_or_else(|| EngineError::UnknownRecipe(recipe_id.to_string()))?;
        if !validated.contains(recipe_id) {
            let errors = validator::validate(recipe);
            if !errors.is_empty() {
                return Err(EngineError::Validation {
                    recipe_id: recipe_id.to_string(),
                    errors,
                });
            }
            validated.insert(recipe_id.to_string());
        }
        Ok(recipe)
    }

    fn effective_guardrails(&self, recipe: &Recipe) -> Guardrails {
        let mut guardrails = recipe.guardrails.clone();
        if let Some(max_visits) = self.options.max_visits_override {
            guardrails.max_step_visits = max_visits;
        }
        if let Some(max_steps) = self.options.max_steps_override {
            guardrails.max_total_steps = max_steps;
        }
        guardrails
    }

    fn report(
        &self,
        recipe: &Recipe,
        final_status: String,
        termination: Termination,
        state: &ExecutionState,
        restarts: u32,
        session_ids: Vec<String>,
    ) -> RunReport {
        RunReport {
            recipe_id: recipe.id.clone(),
            final_status,
            termination,
            steps_taken: state.step_count(),
            step_visits: state.visit_snapshot(),
            restarts,
            session_ids,
        }
    }
}

fn log_usage(response: &AgentResponse) {
    debug!(
        input_tokens = ?response.input_tokens,
        output_tokens = ?response.output_tokens,
        cost_usd = ?response.cost_usd,
        "agent usage"
    );
}
