//! Stable exit codes for the agent-recipes CLI.

/// Run completed: an exit transition was reached.
pub const OK: i32 = 0;
/// Recipe validation failure, or no recipe id was given.
pub const VALIDATION: i32 = 1;
/// Orchestration error: outcome extraction failed twice on the same step visit.
pub const ORCHESTRATION: i32 = 2;
/// A guardrail triggered (max step visits, max total steps, max restarts).
pub const GUARDRAIL: i32 = 3;
/// Backend error: the agent process failed, timed out, or returned an
/// unparseable final record.
pub const BACKEND: i32 = 4;
/// Configuration error: unknown backend, agent CLI not found, unreadable
/// recipe directory or settings file.
pub const CONFIGURATION: i32 = 5;
