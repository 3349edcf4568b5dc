//! Case model: references, configs, bundles and run routines

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::engine::{CrawlHelper, Submission};
use crate::error::RunRoutineError;
use crate::page::PageHandle;

/// Project name reported when a case failed before its config was known
pub const UNKNOWN_PROJECT: &str = "undefined";

/// Locator of a not-yet-loaded case, e.g. `./cases/iot/gateway.yaml`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseReference(String);

impl CaseReference {
    pub fn new(locator: impl Into<String>) -> Self {
        Self(locator.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without its extension; the fallback case name
    pub fn base_name(&self) -> String {
        Path::new(&self.0)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.0.clone())
    }
}

impl fmt::Display for CaseReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared identity and entry points of a case
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseConfig {
    #[serde(default)]
    pub project: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub entries: Vec<Entry>,

    #[serde(default)]
    pub log_options: Option<LogOptions>,

    /// Anything else the case wants to carry to its routine
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl CaseConfig {
    /// URL of the first entry, if it is usable
    pub fn entry_url(&self) -> Option<&str> {
        self.entries
            .first()
            .and_then(|e| e.url.as_deref())
            .filter(|url| !url.trim().is_empty())
    }

    /// Identity for reporting, falling back to the reference's base name
    pub fn identity(&self, reference: &CaseReference) -> CaseIdentity {
        CaseIdentity {
            project: self
                .project
                .clone()
                .unwrap_or_else(|| UNKNOWN_PROJECT.to_string()),
            name: self.name.clone().unwrap_or_else(|| reference.base_name()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub url: Option<String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// Per-case logging knobs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LogOptions {
    /// Label attached to the case's tracing span
    #[serde(default)]
    pub label: Option<String>,
}

/// Who a status line is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseIdentity {
    pub project: String,
    pub name: String,
}

impl CaseIdentity {
    /// Identity used when no config was ever loaded
    pub fn unknown(reference: &CaseReference) -> Self {
        Self {
            project: UNKNOWN_PROJECT.to_string(),
            name: reference.base_name(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaseStatus {
    Pass,
    Fail,
}

impl CaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaseStatus::Pass => "PASS",
            CaseStatus::Fail => "FAIL",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A case's executable body.
///
/// The runner never looks inside a routine: it hands it a page, the crawl
/// helper for the submission and the submission itself, and awaits it.
/// `Ok` settles the case as PASS, `Err` as FAIL.
#[async_trait]
pub trait CaseRoutine: Send + Sync {
    async fn run(
        &self,
        page: &mut dyn PageHandle,
        crawl: &CrawlHelper,
        submission: &Submission,
    ) -> Result<Value, RunRoutineError>;
}

/// The unit submitted to the crawl engine
#[derive(Clone)]
pub struct CaseBundle {
    pub reference: CaseReference,
    pub config: CaseConfig,
    pub run: Arc<dyn CaseRoutine>,
}

impl CaseBundle {
    pub fn identity(&self) -> CaseIdentity {
        self.config.identity(&self.reference)
    }
}

impl fmt::Debug for CaseBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaseBundle")
            .field("reference", &self.reference)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
