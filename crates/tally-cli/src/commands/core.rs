//! Shared command utilities

use std::path::Path;

use anyhow::{Context, Result};
use tally_core::{Config, RuleEngine};

/// Load config from an explicit path, the user config file, or built-in defaults
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(Some(p))
            .with_context(|| format!("Failed to load config {}", p.display())),
        None => Config::load(None).context("Failed to load config"),
    }
}

/// Load a rule file
pub fn load_rules(config: &Config, path: &Path) -> Result<RuleEngine> {
    RuleEngine::load(path, config)
        .with_context(|| format!("Failed to load rules from {}", path.display()))
}
