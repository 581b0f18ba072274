use clap::{Parser, Subcommand};
use cli::config::{self, Overrides};
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Source file to elaborate
    #[arg(required = false)]
    file: Option<PathBuf>,

    /// Commands processed before the run is aborted.
    /// Overrides ELAB_STEP_BUDGET and the config file.
    #[arg(long)]
    step_budget: Option<usize>,

    /// Treat scopes left open at end of input as a fatal error
    #[arg(long)]
    errors_fatal: bool,

    /// TOML configuration file with `[frontend]` and `[log]` tables
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start an interactive session
    Repl,
    /// Elaborate a file and report diagnostics
    Check {
        /// Source file to elaborate
        file: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let overrides = Overrides {
        step_budget: cli.step_budget,
        errors_are_fatal: cli.errors_fatal,
    };
    let resolved = match config::load(cli.config.as_deref(), &overrides) {
        Ok(resolved) => resolved,
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(2);
        }
    };
    cli::init_logging(&resolved.log_filter);
    debug!(
        budget = resolved.frontend.step_budget,
        source = %resolved.budget_source,
        "step budget"
    );

    let file = match cli.command {
        Some(Commands::Repl) => {
            if let Err(err) = cli::repl::start(resolved.frontend) {
                eprintln!("{:#}", err);
                std::process::exit(1);
            }
            return;
        }
        Some(Commands::Check { file }) => Some(file),
        None => cli.file,
    };

    match file {
        Some(path) => {
            let mut stdout = std::io::stdout();
            match cli::run_file(&path, resolved.frontend, &mut stdout) {
                Ok(outcome) => std::process::exit(cli::exit_code(&outcome)),
                Err(err) => {
                    eprintln!("{:#}", err);
                    std::process::exit(1);
                }
            }
        }
        None => {
            if let Err(err) = cli::repl::start(resolved.frontend) {
                eprintln!("{:#}", err);
                std::process::exit(1);
            }
        }
    }
}
