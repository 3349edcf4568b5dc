//! autotest CLI - Main Entry Point
//!
//! Runs every case under a file or directory against Playwright pages and
//! logs one status line per case.

use std::path::PathBuf;

use anyhow::Context;
use clap::{error::ErrorKind, ArgAction, CommandFactory, Parser};
use tracing::{debug, info, warn};

use autotest_e2e::{RunnerConfig, Settings, TestRunner};

mod logging;

/// autotest - concurrent browser case runner
#[derive(Parser, Debug)]
#[command(name = "autotest")]
#[command(author, version, about, long_about = None)]
#[command(disable_help_flag = true)]
struct Cli {
    /// Print usage and exit
    #[arg(short = 'h', long = "help", short_alias = '?', action = ArgAction::SetTrue)]
    help: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,

    /// Case file or directory (defaults to the configured cases directory)
    #[arg(short, long)]
    case: Option<PathBuf>,

    /// Settings file
    #[arg(long, default_value = "autotest.toml")]
    settings: PathBuf,
}

fn parse() -> Cli {
    match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.kind() == ErrorKind::DisplayVersion => {
            let _ = e.print();
            std::process::exit(0);
        }
        Err(e) => {
            let _ = e.print();
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = parse();

    if cli.help {
        eprintln!("{}", Cli::command().render_help());
        std::process::exit(1);
    }

    // Cases read credentials and hosts as ${VAR}; a missing .env is fine.
    let dotenv = dotenvy::dotenv();

    let settings = Settings::load(&cli.settings)
        .with_context(|| format!("Failed to load settings from {}", cli.settings.display()))?;
    logging::init(&settings.log, cli.verbose)?;

    info!("autotest v{}", env!("CARGO_PKG_VERSION"));
    match dotenv {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring unreadable .env file: {}", e),
    }

    let case_path = cli
        .case
        .unwrap_or_else(|| settings.autotest.cases_dir.clone());
    let runner = TestRunner::with_config(RunnerConfig::from_settings(&settings));

    // Failed cases are not a process failure; only fatal errors reach here.
    runner
        .run(&case_path)
        .await
        .with_context(|| format!("Run aborted for {}", case_path.display()))?;

    Ok(())
}
