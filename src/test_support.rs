//! Scripted test doubles and terse recipe builders.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use crate::backend::{AgentBackend, AgentResponse, BackendError, SendPromptRequest};
use crate::model::{Guardrails, ModelTier, Recipe, Step, Transition};

/// One recorded `send_prompt` call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub prompt: String,
    pub session_id: String,
    pub is_new_session: bool,
    pub model_id: Option<String>,
}

/// Backend double that replays queued responses and records every call.
///
/// When the script runs dry, further calls fail like a broken backend
/// instead of panicking, so tests can assert the engine's error path.
#[derive(Default)]
pub struct ScriptedBackend {
    responses: Mutex<VecDeque<Result<AgentResponse, BackendError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    /// Script successful responses from plain response texts.
    pub fn replying(texts: &[&str]) -> Self {
        Self {
            responses: Mutex::new(
                texts
                    .iter()
                    .map(|text| Ok(response(text)))
                    .collect(),
            ),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Script a mix of successes and backend failures.
    pub fn with_results(results: Vec<Result<AgentResponse, BackendError>>) -> Self {
        Self {
            responses: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().expect("responses lock").len()
    }
}

/// A successful response carrying only text.
pub fn response(text: &str) -> AgentResponse {
    AgentResponse {
        response_text: text.to_string(),
        session_id: None,
        input_tokens: None,
        output_tokens: None,
        cost_usd: None,
    }
}

impl AgentBackend for ScriptedBackend {
    fn send_prompt(&self, request: &SendPromptRequest) -> Result<AgentResponse, BackendError> {
        self.calls.lock().expect("calls lock").push(RecordedCall {
            prompt: request.prompt.clone(),
            session_id: request.session_id.clone(),
            is_new_session: request.is_new_session,
            model_id: request.model_id.clone(),
        });
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| {
                Err(BackendError::ProcessFailed {
                    exit_code: None,
                    detail: "scripted backend exhausted".to_string(),
                })
            })
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn resolve_model(&self, tier: ModelTier) -> Option<String> {
        match tier {
            ModelTier::Haiku => Some("haiku".to_string()),
            ModelTier::Sonnet => None,
            ModelTier::Opus => Some("opus".to_string()),
        }
    }
}

/// Build a recipe with default guardrails and no model tier.
pub fn recipe(id: &str, initial_step: &str, steps: Vec<(&str, Step)>) -> Recipe {
    Recipe {
        id: id.to_string(),
        label: format!("{id} label"),
        description: format!("{id} description"),
        initial_step: initial_step.to_string(),
        steps: steps
            .into_iter()
            .map(|(name, step)| (name.to_string(), step))
            .collect(),
        guardrails: Guardrails::default(),
        model: None,
    }
}

/// Build a step whose outcome set is exactly the transition keys.
pub fn step(prompt: &str, transitions: Vec<(&str, Transition)>) -> Step {
    let on_outcome: BTreeMap<String, Transition> = transitions
        .into_iter()
        .map(|(outcome, transition)| (outcome.to_string(), transition))
        .collect();
    Step {
        prompt: prompt.to_string(),
        outcomes: on_outcome.keys().cloned().collect(),
        on_outcome,
        model: None,
    }
}

pub fn next(step: &str) -> Transition {
    Transition::NextStep(step.to_string())
}

pub fn exit(reason: &str) -> Transition {
    Transition::Exit(reason.to_string())
}

pub fn restart(recipe_id: &str) -> Transition {
    Transition::RestartNewSession(recipe_id.to_string())
}
