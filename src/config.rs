//! CLI settings stored in an optional `agent-recipes.toml`.
//!
//! Missing file means defaults; missing fields default individually. Flags
//! on the command line override whatever the file says.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::backend::{DEFAULT_ONE_OFF_TIMEOUT, DEFAULT_STEP_TIMEOUT};

/// Default settings filename, looked up in the working directory.
pub const DEFAULT_SETTINGS_FILE: &str = "agent-recipes.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Directory of recipe `.json` files.
    pub recipes_dir: PathBuf,

    /// Backend name, matched against the known backends.
    pub backend: String,

    /// Deadline in seconds for each recipe-driven agent invocation.
    pub step_timeout_secs: u64,

    /// Deadline in seconds for one-off prompts outside a recipe.
    pub oneoff_timeout_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recipes_dir: PathBuf::from("recipes"),
            backend: "claude-code".to_string(),
            step_timeout_secs: DEFAULT_STEP_TIMEOUT.as_secs(),
            oneoff_timeout_secs: DEFAULT_ONE_OFF_TIMEOUT.as_secs(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        if self.backend.trim().is_empty() {
            return Err(anyhow!("backend must be non-empty"));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.oneoff_timeout_secs == 0 {
            return Err(anyhow!("oneoff_timeout_secs must be > 0"));
        }
        Ok(())
    }
}

/// Load settings from a TOML file; a missing file yields defaults.
pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        let settings = Settings::default();
        settings.validate()?;
        return Ok(settings);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let settings: Settings =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_returns_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent-recipes.toml");
        fs::write(&path, "recipes_dir = \"catalog\"\n").expect("write");

        let settings = load_settings(&path).expect("load");
        assert_eq!(settings.recipes_dir, PathBuf::from("catalog"));
        assert_eq!(settings.backend, "claude-code");
        assert_eq!(settings.step_timeout_secs, 24 * 60 * 60);
    }

    #[test]
    fn rejects_zero_timeouts() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("agent-recipes.toml");
        fs::write(&path, "step_timeout_secs = 0\n").expect("write");

        let err = load_settings(&path).expect_err("must reject");
        assert!(format!("{err:#}").contains("step_timeout_secs"));
    }
}
