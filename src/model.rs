//! Value types for recipes, steps, transitions, and guardrails.
//!
//! A loaded [`Recipe`] is immutable for the lifetime of a run. Loader
//! leniency is deliberate: model strings and transition targets are carried
//! as written and checked by the validator, so a broken recipe produces a
//! full report instead of failing on the first bad field.

use std::collections::{BTreeMap, BTreeSet};

/// A recipe is a finite state machine that guides an agent through steps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipe {
    /// Stable identifier, used on the command line and as restart target.
    pub id: String,
    /// Human-readable label for listings.
    pub label: String,
    pub description: String,
    /// Name of the step the run begins in. Must be a key of `steps`.
    pub initial_step: String,
    pub steps: BTreeMap<String, Step>,
    pub guardrails: Guardrails,
    /// Default model tier for all steps, as written in the recipe file.
    pub model: Option<String>,
}

/// A single unit of work for the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Instruction text sent to the agent, before the outcome-format block.
    pub prompt: String,
    /// The declared outcome alphabet for this step.
    pub outcomes: BTreeSet<String>,
    /// Edge taken for each outcome. Valid recipes cover every outcome.
    pub on_outcome: BTreeMap<String, Transition>,
    /// Model tier override for this step only.
    pub model: Option<String>,
}

/// What happens after a step completes with a given outcome.
///
/// A closed sum with exactly three cases, discriminated on the loader side
/// by field presence; downstream dispatch is exhaustive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Advance to a sibling step in the same recipe.
    NextStep(String),
    /// Terminate the run; the reason becomes the final status verbatim.
    Exit(String),
    /// Discard the current session and start a fresh one running the
    /// identified recipe (possibly this one).
    RestartNewSession(String),
}

/// Hard bounds preventing runaway execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Guardrails {
    /// Maximum visits to any single step within one session.
    pub max_step_visits: u32,
    /// Maximum transitions in one session, counting the initial step.
    pub max_total_steps: u32,
    /// Advisory flag for recipe authors; the engine never consults it. The
    /// catalog gets the same effect by mapping "other" to an exit transition.
    pub exit_on_other: bool,
}

impl Guardrails {
    pub const DEFAULT_MAX_STEP_VISITS: u32 = 3;
    pub const DEFAULT_MAX_TOTAL_STEPS: u32 = 100;
    pub const DEFAULT_EXIT_ON_OTHER: bool = true;
}

impl Default for Guardrails {
    fn default() -> Self {
        Self {
            max_step_visits: Self::DEFAULT_MAX_STEP_VISITS,
            max_total_steps: Self::DEFAULT_MAX_TOTAL_STEPS,
            exit_on_other: Self::DEFAULT_EXIT_ON_OTHER,
        }
    }
}

/// The closed set of abstract model tiers a recipe may name.
///
/// Backends map a tier to a concrete model identifier, or to `None` for
/// "omit the flag and use the backend default".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    Haiku,
    Sonnet,
    Opus,
}

impl ModelTier {
    /// Tier names in the order listed in error messages.
    pub const NAMES: [&'static str; 3] = ["haiku", "sonnet", "opus"];

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "haiku" => Some(Self::Haiku),
            "sonnet" => Some(Self::Sonnet),
            "opus" => Some(Self::Opus),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Haiku => "haiku",
            Self::Sonnet => "sonnet",
            Self::Opus => "opus",
        }
    }
}

/// Result of extracting an outcome from an agent response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeResult {
    Success {
        /// The outcome token, guaranteed to be in the step's alphabet.
        outcome: String,
        /// Present only when the outcome is "other".
        description: Option<String>,
    },
    Failure {
        error: String,
        /// The candidate line that failed to parse or validate, if one was found.
        malformed: Option<String>,
    },
}
