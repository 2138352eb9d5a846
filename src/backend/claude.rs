//! Reference backend driving the Claude Code CLI as a subprocess.
//!
//! Stdout and stderr are redirected to owner-only temp files and read back
//! after the process exits. Reading from in-memory pipes instead would
//! deadlock once the agent's output exceeds the OS pipe buffer.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::Value;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use wait_timeout::ChildExt;

use crate::backend::{AgentBackend, AgentResponse, BackendError, SendPromptRequest};
use crate::model::ModelTier;

/// Names the CLI binary, checked before the canonical install path.
pub const CLI_PATH_ENV: &str = "CLAUDE_CLI_PATH";

/// Variables that make the CLI detect a nested session; stripped from the
/// child's environment.
const NESTED_SESSION_VARS: [&str; 2] = ["CLAUDECODE", "CLAUDE_CODE_ENTRYPOINT"];

/// Grace period between the soft and the hard kill when a deadline expires.
const KILL_GRACE: Duration = Duration::from_millis(200);

/// Bytes of output quoted back in wire-format error messages.
const TAIL_EXCERPT_BYTES: usize = 256;

/// Processes currently serving a `send_prompt` call, keyed by session id,
/// so external cancellation can reach them. Safe for concurrent use.
#[derive(Clone, Default)]
pub struct InflightProcesses {
    pids: Arc<Mutex<HashMap<String, u32>>>,
}

impl InflightProcesses {
    pub fn pid(&self, session_id: &str) -> Option<u32> {
        self.lock().get(session_id).copied()
    }

    fn register(&self, session_id: &str, pid: u32) {
        self.lock().insert(session_id.to_string(), pid);
    }

    fn unregister(&self, session_id: &str) {
        self.lock().remove(session_id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u32>> {
        self.pids.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Removes the in-flight entry on drop, covering every exit path out of
/// `send_prompt` including panics below it.
struct InflightEntry<'a> {
    registry: &'a InflightProcesses,
    session_id: &'a str,
}

impl<'a> InflightEntry<'a> {
    fn register(registry: &'a InflightProcesses, session_id: &'a str, pid: u32) -> Self {
        registry.register(session_id, pid);
        Self {
            registry,
            session_id,
        }
    }
}

impl Drop for InflightEntry<'_> {
    fn drop(&mut self) {
        self.registry.unregister(self.session_id);
    }
}

/// Backend that spawns the Claude Code CLI per invocation.
pub struct ClaudeBackend {
    cli_path: PathBuf,
    append_system_prompt: Option<String>,
    inflight: InflightProcesses,
}

impl ClaudeBackend {
    /// Locate the CLI and build a backend, or fail with a configuration
    /// error when no binary can be found.
    pub fn discover(append_system_prompt: Option<String>) -> Result<Self> {
        let cli_path = discover_cli_path().ok_or_else(|| {
            anyhow!(
                "claude CLI not found: set {CLI_PATH_ENV} or install it at ~/.claude/local/claude"
            )
        })?;
        Ok(Self::with_cli_path(cli_path, append_system_prompt))
    }

    pub fn with_cli_path(cli_path: PathBuf, append_system_prompt: Option<String>) -> Self {
        Self {
            cli_path,
            append_system_prompt,
            inflight: InflightProcesses::default(),
        }
    }

    /// Shared handle onto the in-flight process map.
    pub fn inflight(&self) -> InflightProcesses {
        self.inflight.clone()
    }

    /// Cancel the in-flight invocation for a session, if any, with the same
    /// two-stage termination used on deadline expiry. Returns whether a
    /// process was found.
    pub fn cancel(&self, session_id: &str) -> bool {
        let Some(pid) = self.inflight.pid(session_id) else {
            return false;
        };
        warn!(session_id, pid, "cancelling in-flight agent process");
        terminate_pid(pid);
        true
    }

    /// Argv in the fixed order the wire contract pins down, so recordings
    /// stay stable: print flag, output format, permission skip, session
    /// selector, model, system prompt, then the prompt positional.
    fn build_args(&self, request: &SendPromptRequest) -> Vec<String> {
        let mut args = vec![
            "--print".to_string(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--dangerously-skip-permissions".to_string(),
        ];
        if request.is_new_session {
            args.push("--session-id".to_string());
        } else {
            args.push("--resume".to_string());
        }
        args.push(request.session_id.clone());
        if let Some(model_id) = &request.model_id {
            args.push("--model".to_string());
            args.push(model_id.clone());
        }
        if let Some(system_prompt) = &self.append_system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        args.push(request.prompt.clone());
        args
    }
}

impl AgentBackend for ClaudeBackend {
    fn send_prompt(&self, request: &SendPromptRequest) -> Result<AgentResponse, BackendError> {
        // Owner-only (0600) by default; dropped at the end of this call on
        // every path, which also deletes them.
        let stdout_file = NamedTempFile::new()?;
        let stderr_file = NamedTempFile::new()?;

        let mut cmd = Command::new(&self.cli_path);
        cmd.args(self.build_args(request))
            .current_dir(&request.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::from(stdout_file.reopen()?))
            .stderr(Stdio::from(stderr_file.reopen()?));
        for var in NESTED_SESSION_VARS {
            cmd.env_remove(var);
        }
        for (key, value) in &request.env_overrides {
            cmd.env(key, value);
        }

        debug!(
            session_id = %request.session_id,
            new_session = request.is_new_session,
            model = request.model_id.as_deref().unwrap_or("default"),
            "spawning agent process"
        );
        let mut child = cmd.spawn().map_err(|err| BackendError::Spawn {
            detail: format!("{}: {err}", self.cli_path.display()),
        })?;
        // Opened piped, then immediately closed: the CLI reads the prompt
        // from argv and must see EOF on stdin.
        drop(child.stdin.take());

        let _inflight = InflightEntry::register(&self.inflight, &request.session_id, child.id());

        let status = match child.wait_timeout(request.timeout)? {
            Some(status) => status,
            None => {
                warn!(
                    session_id = %request.session_id,
                    timeout_secs = request.timeout.as_secs(),
                    "deadline expired, terminating agent process"
                );
                terminate_child(&mut child)?;
                return Err(BackendError::Timeout {
                    timeout_secs: request.timeout.as_secs(),
                });
            }
        };

        let stdout = fs::read_to_string(stdout_file.path())?;
        let stderr = fs::read_to_string(stderr_file.path())?;
        debug!(
            session_id = %request.session_id,
            exit_code = ?status.code(),
            stdout_bytes = stdout.len(),
            "agent process exited"
        );

        parse_wire(&stdout).map_err(|err| {
            if status.success() {
                err
            } else {
                BackendError::ProcessFailed {
                    exit_code: status.code(),
                    detail: tail_excerpt(&stderr, TAIL_EXCERPT_BYTES),
                }
            }
        })
    }

    fn name(&self) -> &str {
        "claude-code"
    }

    fn resolve_model(&self, tier: ModelTier) -> Option<String> {
        match tier {
            ModelTier::Haiku => Some("haiku".to_string()),
            // Sonnet is the CLI default; omit the flag.
            ModelTier::Sonnet => None,
            ModelTier::Opus => Some("opus".to_string()),
        }
    }
}

fn discover_cli_path() -> Option<PathBuf> {
    if let Ok(path) = env::var(CLI_PATH_ENV) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }
    let home = env::var_os("HOME")?;
    let canonical = Path::new(&home).join(".claude").join("local").join("claude");
    canonical.is_file().then_some(canonical)
}

/// Parse the CLI's stream-json output: one JSON record per line, with the
/// record tagged `"type": "result"` carrying the final assistant message,
/// session id, usage, and cost. The last result record wins.
fn parse_wire(stdout: &str) -> Result<AgentResponse, BackendError> {
    let mut final_record: Option<Value> = None;
    for line in stdout.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
            if value.get("type").and_then(Value::as_str) == Some("result") {
                final_record = Some(value);
            }
        }
    }

    let record = final_record.ok_or_else(|| BackendError::MalformedWire {
        tail: tail_excerpt(stdout, TAIL_EXCERPT_BYTES),
    })?;

    if record
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(BackendError::ProcessFailed {
            exit_code: None,
            detail: record
                .get("result")
                .and_then(Value::as_str)
                .unwrap_or("agent reported an error")
                .to_string(),
        });
    }

    let response_text = record
        .get("result")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::MalformedWire {
            tail: "result record has no text field".to_string(),
        })?
        .to_string();

    Ok(AgentResponse {
        response_text,
        session_id: record
            .get("session_id")
            .and_then(Value::as_str)
            .map(str::to_string),
        input_tokens: record.pointer("/usage/input_tokens").and_then(Value::as_u64),
        output_tokens: record
            .pointer("/usage/output_tokens")
            .and_then(Value::as_u64),
        cost_usd: record.get("total_cost_usd").and_then(Value::as_f64),
    })
}

/// Soft-terminate the child, give it [`KILL_GRACE`] to exit, then hard-kill.
fn terminate_child(child: &mut Child) -> Result<(), BackendError> {
    soft_kill(child);
    if child.wait_timeout(KILL_GRACE)?.is_none() {
        child.kill()?;
        child.wait()?;
    }
    Ok(())
}

#[cfg(unix)]
fn soft_kill(child: &Child) {
    // SAFETY: sending a signal to a pid we just spawned.
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGTERM);
    }
}

#[cfg(not(unix))]
fn soft_kill(_child: &Child) {}

#[cfg(unix)]
fn terminate_pid(pid: u32) {
    // SAFETY: signalling a pid taken from the in-flight map.
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    std::thread::sleep(KILL_GRACE);
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn terminate_pid(_pid: u32) {}

fn tail_excerpt(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}
