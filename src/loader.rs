//! Recipe loading from JSON files, plus canonical re-emission.
//!
//! Transition objects are discriminated by field presence in fixed priority:
//! `nextStep`, then `action == "exit"`, then `action == "restart-new-session"`.
//! Anything else is a loading error. Missing guardrail fields take defaults.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{Map, Value};

use crate::model::{Guardrails, Recipe, Step, Transition};

/// Load a single recipe from a JSON string.
pub fn load_from_str(raw: &str) -> Result<Recipe> {
    let root: Value = serde_json::from_str(raw).context("parse recipe json")?;
    parse_recipe(&root)
}

/// Load a single recipe from a JSON file.
pub fn load_from_file(path: &Path) -> Result<Recipe> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read recipe {}", path.display()))?;
    let root: Value = serde_json::from_str(&contents)
        .with_context(|| format!("parse recipe {}", path.display()))?;
    parse_recipe(&root).with_context(|| format!("load recipe {}", path.display()))
}

/// Load every `.json` recipe from a flat directory, sorted by filename.
///
/// Recipes are keyed by id; on duplicate ids the later filename wins.
pub fn load_from_dir(dir: &Path) -> Result<BTreeMap<String, Recipe>> {
    let entries = fs::read_dir(dir)
        .with_context(|| format!("read recipes directory {}", dir.display()))?;
    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut recipes = BTreeMap::new();
    for path in files {
        let recipe = load_from_file(&path)?;
        recipes.insert(recipe.id.clone(), recipe);
    }
    Ok(recipes)
}

fn parse_recipe(root: &Value) -> Result<Recipe> {
    let obj = root
        .as_object()
        .ok_or_else(|| anyhow!("recipe must be a JSON object"))?;
    Ok(Recipe {
        id: required_str(obj, "id")?,
        label: required_str(obj, "label")?,
        description: required_str(obj, "description")?,
        initial_step: required_str(obj, "initialStep")?,
        steps: parse_steps(obj.get("steps"))?,
        guardrails: parse_guardrails(obj.get("guardrails"))?,
        model: optional_str(obj, "model")?,
    })
}

fn parse_guardrails(node: Option<&Value>) -> Result<Guardrails> {
    let Some(node) = node else {
        return Ok(Guardrails::default());
    };
    let obj = node
        .as_object()
        .ok_or_else(|| anyhow!("guardrails must be a JSON object"))?;
    Ok(Guardrails {
        max_step_visits: positive_u32_or(obj, "maxStepVisits", Guardrails::DEFAULT_MAX_STEP_VISITS)?,
        max_total_steps: positive_u32_or(obj, "maxTotalSteps", Guardrails::DEFAULT_MAX_TOTAL_STEPS)?,
        exit_on_other: bool_or(obj, "exitOnOther", Guardrails::DEFAULT_EXIT_ON_OTHER)?,
    })
}

fn parse_steps(node: Option<&Value>) -> Result<BTreeMap<String, Step>> {
    let obj = node
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("recipe is missing the 'steps' object"))?;
    let mut steps = BTreeMap::new();
    for (name, value) in obj {
        let step = parse_step(value).with_context(|| format!("step '{name}'"))?;
        steps.insert(name.clone(), step);
    }
    Ok(steps)
}

fn parse_step(node: &Value) -> Result<Step> {
    let obj = node
        .as_object()
        .ok_or_else(|| anyhow!("step must be a JSON object"))?;

    let outcomes_node = obj
        .get("outcomes")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("missing 'outcomes' array"))?;
    let mut outcomes = BTreeSet::new();
    for value in outcomes_node {
        let outcome = value
            .as_str()
            .ok_or_else(|| anyhow!("outcomes must be strings"))?;
        outcomes.insert(outcome.to_string());
    }

    let on_outcome_node = obj
        .get("onOutcome")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow!("missing 'onOutcome' object"))?;
    let mut on_outcome = BTreeMap::new();
    for (outcome, value) in on_outcome_node {
        let transition =
            parse_transition(value).with_context(|| format!("transition for '{outcome}'"))?;
        on_outcome.insert(outcome.clone(), transition);
    }

    Ok(Step {
        prompt: required_str(obj, "prompt")?,
        outcomes,
        on_outcome,
        model: optional_str(obj, "model")?,
    })
}

fn parse_transition(node: &Value) -> Result<Transition> {
    let obj = node
        .as_object()
        .ok_or_else(|| anyhow!("transition must be a JSON object"))?;
    if obj.contains_key("nextStep") {
        return Ok(Transition::NextStep(required_str(obj, "nextStep")?));
    }
    match obj.get("action").and_then(Value::as_str) {
        Some("exit") => Ok(Transition::Exit(required_str(obj, "reason")?)),
        Some("restart-new-session") => {
            Ok(Transition::RestartNewSession(required_str(obj, "recipeId")?))
        }
        _ => bail!("unknown transition format: {node}"),
    }
}

fn required_str(obj: &Map<String, Value>, key: &str) -> Result<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing string field '{key}'"))
}

fn optional_str(obj: &Map<String, Value>, key: &str) -> Result<Option<String>> {
    match obj.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => bail!("field '{key}' must be a string, got {other}"),
    }
}

fn positive_u32_or(obj: &Map<String, Value>, key: &str, default: u32) -> Result<u32> {
    let Some(value) = obj.get(key) else {
        return Ok(default);
    };
    let n = value
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| anyhow!("field '{key}' must be a positive integer, got {value}"))?;
    if n == 0 {
        bail!("field '{key}' must be positive");
    }
    Ok(n)
}

fn bool_or(obj: &Map<String, Value>, key: &str, default: bool) -> Result<bool> {
    match obj.get(key) {
        None => Ok(default),
        Some(Value::Bool(b)) => Ok(*b),
        Some(other) => bail!("field '{key}' must be a boolean, got {other}"),
    }
}

/// Re-emit a recipe in the canonical file shape.
///
/// Loading the emitted value yields an identical in-memory recipe.
pub fn emit_recipe(recipe: &Recipe) -> Value {
    let mut root = Map::new();
    root.insert("id".into(), recipe.id.clone().into());
    root.insert("label".into(), recipe.label.clone().into());
    root.insert("description".into(), recipe.description.clone().into());
    root.insert("initialStep".into(), recipe.initial_step.clone().into());
    if let Some(model) = &recipe.model {
        root.insert("model".into(), model.clone().into());
    }
    root.insert("guardrails".into(), emit_guardrails(&recipe.guardrails));

    let mut steps = Map::new();
    for (name, step) in &recipe.steps {
        steps.insert(name.clone(), emit_step(step));
    }
    root.insert("steps".into(), Value::Object(steps));
    Value::Object(root)
}

fn emit_guardrails(guardrails: &Guardrails) -> Value {
    let mut obj = Map::new();
    obj.insert("maxStepVisits".into(), guardrails.max_step_visits.into());
    obj.insert("maxTotalSteps".into(), guardrails.max_total_steps.into());
    obj.insert("exitOnOther".into(), guardrails.exit_on_other.into());
    Value::Object(obj)
}

fn emit_step(step: &Step) -> Value {
    let mut obj = Map::new();
    obj.insert("prompt".into(), step.prompt.clone().into());
    if let Some(model) = &step.model {
        obj.insert("model".into(), model.clone().into());
    }
    obj.insert(
        "outcomes".into(),
        Value::Array(step.outcomes.iter().map(|o| o.clone().into()).collect()),
    );
    let mut on_outcome = Map::new();
    for (outcome, transition) in &step.on_outcome {
        on_outcome.insert(outcome.clone(), emit_transition(transition));
    }
    obj.insert("onOutcome".into(), Value::Object(on_outcome));
    Value::Object(obj)
}

fn emit_transition(transition: &Transition) -> Value {
    let mut obj = Map::new();
    match transition {
        Transition::NextStep(step) => {
            obj.insert("nextStep".into(), step.clone().into());
        }
        Transition::Exit(reason) => {
            obj.insert("action".into(), "exit".into());
            obj.insert("reason".into(), reason.clone().into());
        }
        Transition::RestartNewSession(recipe_id) => {
            obj.insert("action".into(), "restart-new-session".into());
            obj.insert("recipeId".into(), recipe_id.clone().into());
        }
    }
    Value::Object(obj)
}
