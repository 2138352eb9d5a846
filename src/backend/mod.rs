//! Backend abstraction over agent CLIs.
//!
//! A backend turns a prompt plus session flags into an [`AgentResponse`] by
//! driving an opaque agent process. The engine only ever talks to the
//! [`AgentBackend`] trait; tests substitute a scripted double.

pub mod claude;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::ModelTier;

/// Default deadline for a recipe-driven step invocation.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);
/// Default deadline for a one-off prompt outside a recipe.
pub const DEFAULT_ONE_OFF_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// One agent invocation.
#[derive(Debug, Clone)]
pub struct SendPromptRequest {
    /// Full prompt text, including the outcome-format block.
    pub prompt: String,
    /// Session identifier for conversation continuity.
    pub session_id: String,
    /// Create a new conversation under `session_id` rather than resuming it.
    pub is_new_session: bool,
    /// Working directory for the agent process.
    pub working_dir: PathBuf,
    /// Backend-specific model identifier, or `None` for the backend default.
    pub model_id: Option<String>,
    /// Extra environment variables for the agent process, applied last.
    pub env_overrides: BTreeMap<String, String>,
    /// Deadline for the invocation.
    pub timeout: Duration,
}

/// Structured response from a successful agent invocation.
///
/// Usage and cost are `None` for backends that do not report them.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// The agent's final assistant message as plain text.
    pub response_text: String,
    /// Session identifier as reported by the backend.
    pub session_id: Option<String>,
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub cost_usd: Option<f64>,
}

/// Fatal invocation failures. The engine never retries these.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("failed to spawn agent process: {detail}")]
    Spawn { detail: String },

    #[error("agent process timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("agent process failed (exit {exit_code:?}): {detail}")]
    ProcessFailed {
        exit_code: Option<i32>,
        detail: String,
    },

    #[error("no final result record in agent output: {tail}")]
    MalformedWire { tail: String },

    #[error("agent io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability of driving one kind of agent CLI.
pub trait AgentBackend {
    /// Send a prompt and block until the agent responds or the deadline
    /// expires. With `is_new_session` the backend creates a new conversation
    /// under the supplied session id; otherwise it resumes that
    /// conversation, preserving prior turns.
    fn send_prompt(&self, request: &SendPromptRequest) -> Result<AgentResponse, BackendError>;

    /// Display name, e.g. for `--backend` matching and log lines.
    fn name(&self) -> &str;

    /// Map an abstract model tier to a backend-specific model identifier,
    /// or `None` to omit the model flag and use the backend default.
    fn resolve_model(&self, tier: ModelTier) -> Option<String>;
}
