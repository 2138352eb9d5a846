//! CLI entry point for agent-recipes.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use agent_recipes::backend::claude::ClaudeBackend;
use agent_recipes::backend::AgentBackend;
use agent_recipes::config::{load_settings, DEFAULT_SETTINGS_FILE};
use agent_recipes::engine::{Engine, EngineError, EngineOptions, Termination};
use agent_recipes::exit_codes;
use agent_recipes::loader;
use agent_recipes::logging;
use agent_recipes::model::{ModelTier, Recipe, Transition};
use agent_recipes::validator;

#[derive(Parser)]
#[command(
    name = "agent-recipes",
    version,
    about = "Orchestrate multi-step, structured workflows for coding agents"
)]
struct Cli {
    /// Recipe ID to execute.
    recipe_id: Option<String>,

    /// List all available recipes.
    #[arg(long)]
    list: bool,

    /// Validate and print the recipe structure without executing.
    #[arg(long)]
    dry_run: bool,

    /// Log orchestration events to stderr.
    #[arg(long)]
    verbose: bool,

    /// Agent backend to use.
    #[arg(long)]
    backend: Option<String>,

    /// Model tier override (haiku, sonnet, opus). Overrides the recipe
    /// default but not per-step overrides.
    #[arg(long)]
    model: Option<String>,

    /// Override the maxTotalSteps guardrail.
    #[arg(long)]
    max_steps: Option<u32>,

    /// Override the maxStepVisits guardrail.
    #[arg(long)]
    max_visits: Option<u32>,

    /// Cap restart-new-session cycles (default: unlimited).
    #[arg(long)]
    max_restarts: Option<u32>,

    /// Working directory for the agent (default: current directory).
    #[arg(long)]
    working_dir: Option<PathBuf>,

    /// Optional system prompt appended to the backend default.
    #[arg(long)]
    system_prompt: Option<String>,

    /// Directory of recipe files.
    #[arg(long)]
    recipes_dir: Option<PathBuf>,

    /// Settings file path.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    std::process::exit(run(&cli));
}

fn run(cli: &Cli) -> i32 {
    let settings_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_SETTINGS_FILE));
    let settings = match load_settings(&settings_path) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("error: {err:#}");
            return exit_codes::CONFIGURATION;
        }
    };

    let recipes_dir = cli
        .recipes_dir
        .clone()
        .unwrap_or_else(|| settings.recipes_dir.clone());
    let recipes = match loader::load_from_dir(&recipes_dir) {
        Ok(recipes) => recipes,
        Err(err) => {
            eprintln!("error: {err:#}");
            return exit_codes::CONFIGURATION;
        }
    };

    if cli.list {
        println!("Available recipes:");
        for recipe in recipes.values() {
            println!("  {}  {}", recipe.id, recipe.label);
        }
        return exit_codes::OK;
    }

    let Some(recipe_id) = &cli.recipe_id else {
        eprintln!("error: recipe ID required (use --list to see available recipes)");
        return exit_codes::VALIDATION;
    };
    let Some(recipe) = recipes.get(recipe_id) else {
        eprintln!("error: recipe '{recipe_id}' not found in {}", recipes_dir.display());
        return exit_codes::VALIDATION;
    };

    if cli.dry_run {
        let errors = validator::validate(recipe);
        if !errors.is_empty() {
            eprintln!("recipe '{recipe_id}' failed validation:");
            for error in &errors {
                eprintln!("- {error}");
            }
            return exit_codes::VALIDATION;
        }
        print_structure(recipe);
        return exit_codes::OK;
    }

    let model_override = match &cli.model {
        None => None,
        Some(raw) => match ModelTier::parse(raw) {
            Some(tier) => Some(tier),
            None => {
                eprintln!(
                    "error: invalid model '{raw}'. Valid models: {}",
                    ModelTier::NAMES.join(", ")
                );
                return exit_codes::VALIDATION;
            }
        },
    };

    let backend_name = cli.backend.as_deref().unwrap_or(&settings.backend);
    let backend = match backend_name {
        "claude-code" => match ClaudeBackend::discover(cli.system_prompt.clone()) {
            Ok(backend) => backend,
            Err(err) => {
                eprintln!("error: {err:#}");
                return exit_codes::CONFIGURATION;
            }
        },
        other => {
            eprintln!("error: unknown backend '{other}'");
            return exit_codes::CONFIGURATION;
        }
    };

    let options = EngineOptions {
        working_dir: cli.working_dir.clone().unwrap_or_else(|| PathBuf::from(".")),
        model_override,
        max_visits_override: cli.max_visits,
        max_steps_override: cli.max_steps,
        max_restarts: cli.max_restarts,
        step_timeout: Duration::from_secs(settings.step_timeout_secs),
        env_overrides: BTreeMap::new(),
    };

    execute(&backend, &recipes, options, recipe_id)
}

fn execute<B: AgentBackend>(
    backend: &B,
    recipes: &BTreeMap<String, Recipe>,
    options: EngineOptions,
    recipe_id: &str,
) -> i32 {
    let engine = Engine::new(backend, recipes, options);
    match engine.run(recipe_id) {
        Ok(report) => {
            println!("{}", report.final_status);
            termination_code(report.termination)
        }
        Err(err) => {
            eprintln!("error: {err}");
            engine_error_code(&err)
        }
    }
}

fn termination_code(termination: Termination) -> i32 {
    match termination {
        Termination::Completed => exit_codes::OK,
        Termination::OrchestrationError => exit_codes::ORCHESTRATION,
        Termination::GuardrailTriggered => exit_codes::GUARDRAIL,
    }
}

fn engine_error_code(err: &EngineError) -> i32 {
    match err {
        EngineError::Validation { .. } => exit_codes::VALIDATION,
        EngineError::Backend(_) => exit_codes::BACKEND,
        EngineError::UnknownRecipe(_) | EngineError::CorruptRecipe { .. } => {
            exit_codes::CONFIGURATION
        }
    }
}

fn print_structure(recipe: &Recipe) {
    println!("recipe {}: {}", recipe.id, recipe.label);
    println!("  {}", recipe.description);
    println!("  initial step: {}", recipe.initial_step);
    println!(
        "  guardrails: maxStepVisits={} maxTotalSteps={}",
        recipe.guardrails.max_step_visits, recipe.guardrails.max_total_steps
    );
    if let Some(model) = &recipe.model {
        println!("  model: {model}");
    }
    for (name, step) in &recipe.steps {
        match &step.model {
            Some(model) => println!("  step {name} (model: {model})"),
            None => println!("  step {name}"),
        }
        for (outcome, transition) in &step.on_outcome {
            match transition {
                Transition::NextStep(target) => println!("    {outcome} -> step {target}"),
                Transition::Exit(reason) => println!("    {outcome} -> exit ({reason})"),
                Transition::RestartNewSession(target) => {
                    println!("    {outcome} -> restart-new-session ({target})")
                }
            }
        }
    }
}
