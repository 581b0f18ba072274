pub mod config;
pub mod render;
pub mod repl;

use anyhow::{Context, Result};
use frontend::{Driver, FrontendConfig, RunOutcome};
use render::Renderer;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Install the global `tracing` subscriber. Logs go to stderr so they never
/// mix with diagnostics.
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Elaborate a whole source text, rendering its diagnostics into `out`.
pub fn check_source(
    filename: &str,
    source: &str,
    config: FrontendConfig,
    out: &mut impl Write,
) -> Result<RunOutcome> {
    let mut driver = Driver::new(config);
    let outcome = driver.run(source);
    info!(
        file = filename,
        commands = outcome.commands,
        constants = driver.environment().len(),
        fatal = outcome.fatal,
        "elaboration finished"
    );
    Renderer::new(filename, source)
        .write_all(&outcome.diagnostics, out)
        .context("failed to write diagnostics")?;
    Ok(outcome)
}

pub fn run_file(path: &Path, config: FrontendConfig, out: &mut impl Write) -> Result<RunOutcome> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read '{}'", path.display()))?;
    debug!(path = %path.display(), bytes = source.len(), "read source");
    check_source(&path.display().to_string(), &source, config, out)
}

/// Process exit code for a finished run.
pub fn exit_code(outcome: &RunOutcome) -> i32 {
    if outcome.fatal {
        2
    } else if outcome.has_errors() {
        1
    } else {
        0
    }
}
