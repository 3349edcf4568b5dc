//! Log setup: stdout plus an append-mode file under the log directory

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::Context;
use autotest_e2e::settings::LogSettings;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Filter for this run: `-v` forces debug, otherwise `RUST_LOG` or the
/// configured level
pub fn filter(settings: &LogSettings, verbose: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level))
    }
}

/// Install the global subscriber. Creates the log directory if needed.
pub fn init(settings: &LogSettings, verbose: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.dir)
        .with_context(|| format!("Failed to create log directory {}", settings.dir.display()))?;

    let path = settings.file_path();
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))?;

    let file_layer = if settings.json {
        fmt::layer()
            .json()
            .with_writer(Mutex::new(file))
            .boxed()
    } else {
        fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .boxed()
    };

    tracing_subscriber::registry()
        .with(filter(settings, verbose))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("Failed to install log subscriber")?;

    Ok(())
}
