//! Run configuration
//!
//! The step budget is taken from, in order: `--step-budget`, the
//! `ELAB_STEP_BUDGET` environment variable, the `[frontend]` table of the
//! config file, and finally the built-in default.

use anyhow::{Context, Result};
use frontend::FrontendConfig;
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

pub const STEP_BUDGET_ENV: &str = "ELAB_STEP_BUDGET";
pub const LOG_ENV: &str = "ELAB_LOG";
pub const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// `tracing` filter directive used when `ELAB_LOG` is unset.
    pub filter: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub frontend: FrontendConfig,
    pub log: LogConfig,
}

impl ConfigFile {
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config '{}'", path.display()))?;
        toml::from_str(&text).with_context(|| format!("failed to parse config '{}'", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetSource {
    Default,
    File,
    Env,
    Flag,
}

impl fmt::Display for BudgetSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BudgetSource::Default => write!(f, "default"),
            BudgetSource::File => write!(f, "config file"),
            BudgetSource::Env => write!(f, "{}", STEP_BUDGET_ENV),
            BudgetSource::Flag => write!(f, "--step-budget"),
        }
    }
}

/// Command-line settings that take priority over everything else.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub step_budget: Option<usize>,
    pub errors_are_fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub frontend: FrontendConfig,
    pub budget_source: BudgetSource,
    pub log_filter: String,
}

/// Combine the layers. `env_budget` and `env_log` are the raw environment
/// values; unparsable or zero budgets from the environment are ignored.
pub fn resolve(
    file: Option<ConfigFile>,
    overrides: &Overrides,
    env_budget: Option<&str>,
    env_log: Option<&str>,
) -> Resolved {
    let from_file = file.is_some();
    let file = file.unwrap_or_default();
    let mut frontend = file.frontend;
    let mut budget_source = if from_file {
        BudgetSource::File
    } else {
        BudgetSource::Default
    };

    if let Some(budget) = env_budget
        .and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|b| *b > 0)
    {
        frontend.step_budget = budget;
        budget_source = BudgetSource::Env;
    }
    if let Some(budget) = overrides.step_budget {
        frontend.step_budget = budget;
        budget_source = BudgetSource::Flag;
    }
    if overrides.errors_are_fatal {
        frontend.errors_are_fatal = true;
    }

    let log_filter = env_log
        .map(str::to_string)
        .or(file.log.filter)
        .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());

    Resolved {
        frontend,
        budget_source,
        log_filter,
    }
}

/// `resolve` against the real environment and an optional config path.
pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Resolved> {
    let file = path.map(ConfigFile::load).transpose()?;
    let env_budget = std::env::var(STEP_BUDGET_ENV).ok();
    let env_log = std::env::var(LOG_ENV).ok();
    Ok(resolve(file, overrides, env_budget.as_deref(), env_log.as_deref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_any_layer() {
        let resolved = resolve(None, &Overrides::default(), None, None);
        assert_eq!(resolved.frontend, FrontendConfig::default());
        assert_eq!(resolved.budget_source, BudgetSource::Default);
        assert_eq!(resolved.log_filter, "warn");
    }

    #[test]
    fn flag_beats_env_beats_file() {
        let file = ConfigFile::parse("[frontend]\nstep_budget = 10\n").unwrap();
        let resolved = resolve(Some(file.clone()), &Overrides::default(), None, None);
        assert_eq!((resolved.frontend.step_budget, resolved.budget_source), (10, BudgetSource::File));

        let resolved = resolve(Some(file.clone()), &Overrides::default(), Some("20"), None);
        assert_eq!((resolved.frontend.step_budget, resolved.budget_source), (20, BudgetSource::Env));

        let flags = Overrides {
            step_budget: Some(30),
            errors_are_fatal: false,
        };
        let resolved = resolve(Some(file), &flags, Some("20"), None);
        assert_eq!((resolved.frontend.step_budget, resolved.budget_source), (30, BudgetSource::Flag));
    }

    #[test]
    fn bad_env_budgets_are_ignored() {
        for raw in ["0", "-3", "lots"] {
            let resolved = resolve(None, &Overrides::default(), Some(raw), None);
            assert_eq!(resolved.budget_source, BudgetSource::Default, "{}", raw);
        }
    }

    #[test]
    fn file_keeps_unset_fields_at_default() {
        let file = ConfigFile::parse("[frontend]\nerrors_are_fatal = true\n[log]\nfilter = \"debug\"\n").unwrap();
        let resolved = resolve(Some(file), &Overrides::default(), None, None);
        assert!(resolved.frontend.errors_are_fatal);
        assert_eq!(resolved.frontend.step_budget, 10_000);
        assert_eq!(resolved.log_filter, "debug");
        let resolved = resolve(None, &Overrides::default(), None, Some("trace"));
        assert_eq!(resolved.log_filter, "trace");
    }

    #[test]
    fn unknown_tables_are_rejected() {
        assert!(ConfigFile::parse("[backend]\nopt = 3\n").is_err());
    }
}
