use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crucible::agent::Roster;
use crucible::config::CrucibleConfig;
use crucible::errors::{EXIT_FAILURE, EXIT_SUCCESS};
use crucible::ledger::{Ledger, SqliteStore};
use crucible::orchestrator::Orchestrator;
use crucible::sandbox::DockerSandbox;

#[derive(Parser)]
#[command(name = "crucible")]
#[command(version, about = "Adversarial code-improvement orchestrator")]
struct Cli {
    /// Initial prompt for code generation
    initial_prompt: String,

    /// Feature request injected at the configured iteration
    #[arg(short, long)]
    feature_request: Option<String>,

    /// Path to the configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the output ledger database (overrides [ledger] path)
    #[arg(short = 'd', long)]
    ledger_path: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let mut config = match CrucibleConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(error) => {
            error!("{error:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    if let Some(path) = cli.ledger_path {
        config.ledger.path = path;
    }

    let store = match SqliteStore::new(&config.ledger.path) {
        Ok(store) => store,
        Err(error) => {
            error!("{error:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };
    info!(run_id = %store.run_id(), ledger = %config.ledger.path.display(), "ledger opened");

    let roster = match Roster::from_config(&config.agents) {
        Ok(roster) => roster,
        Err(error) => {
            error!("{error:#}");
            return ExitCode::from(EXIT_FAILURE);
        }
    };

    let sandbox = DockerSandbox::new(&config.sandbox);
    let mut orchestrator = Orchestrator::new(config, roster, sandbox);
    let (ledger, writer) = Ledger::spawn(Box::new(store));

    let result = orchestrator
        .run(&ledger, &cli.initial_prompt, cli.feature_request.as_deref())
        .await;

    // Drain the ledger on every exit path so the final iteration's
    // records are never lost.
    writer.shutdown(ledger).await;

    match result {
        Ok(outcome) => {
            info!(
                iterations = outcome.iterations,
                "final artifact:\n{}",
                outcome.artifact
            );
            ExitCode::from(EXIT_SUCCESS)
        }
        Err(error) => {
            error!("{error:#}");
            ExitCode::from(error.exit_status())
        }
    }
}
