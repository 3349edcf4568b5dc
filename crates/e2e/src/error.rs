//! Error types for the autotest runner

use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors. Anything surfacing as an `E2eError` aborts the run.
#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Case discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Settings error: {0}")]
    Settings(String),

    #[error("Playwright not found. Install with: npm install playwright")]
    PlaywrightNotFound,

    #[error("Browser launch failed: {0}")]
    BrowserLaunch(String),

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Case discovery failures. There is no best-effort mode.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Case path does not exist: {0}")]
    NotFound(PathBuf),

    #[error("Not a case file (unrecognized extension): {0}")]
    UnsupportedFile(PathBuf),

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// The case file could not be read or evaluated.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("no case registered for {0}")]
    Unregistered(String),

    #[error("failed to expand {path}: {source}")]
    Env {
        path: PathBuf,
        #[source]
        source: EnvError,
    },
}

/// A `${VAR}` reference could not be expanded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvError {
    #[error("environment variable {0} is not set")]
    Unset(String),

    #[error("unterminated variable reference in '{0}'")]
    Unterminated(String),
}

/// The crawl engine refused a submission.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnqueueError {
    #[error("engine queue is closed")]
    Closed,

    #[error("invalid entry url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("duplicate url skipped: {0}")]
    Duplicate(String),
}

/// A case's own run routine failed.
#[derive(Error, Debug)]
pub enum RunRoutineError {
    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Navigation to {url} failed after {attempts} attempt(s): {source}")]
    Navigation {
        url: String,
        attempts: usize,
        #[source]
        source: PageError,
    },

    #[error("Page error: {0}")]
    Page(#[from] PageError),

    #[error("Environment error: {0}")]
    Env(#[from] EnvError),

    #[error("Routine panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

/// Failures talking to a page.
#[derive(Error, Debug, Clone)]
pub enum PageError {
    #[error("browser bridge disconnected")]
    Disconnected,

    #[error("{op} failed: {message}")]
    Command { op: String, message: String },

    #[error("unexpected response for {op}: {value}")]
    UnexpectedValue { op: String, value: String },

    #[error("failed to open page: {0}")]
    Open(String),
}

/// Why a single case ended as FAIL. Never fatal to the run.
#[derive(Error, Debug)]
pub enum CaseError {
    #[error("failed to import case: {reference}: {source}")]
    Load {
        reference: String,
        #[source]
        source: LoadError,
    },

    #[error("failed to import case: {reference}, {reason}")]
    Malformed { reference: String, reason: String },

    #[error("failed to enqueue case: {reference}: {source}")]
    Enqueue {
        reference: String,
        #[source]
        source: EnqueueError,
    },
}
