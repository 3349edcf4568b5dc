//! Status lines and the run summary

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{error, info};

use crate::case::{CaseIdentity, CaseReference, CaseStatus};
use crate::engine::SubmissionResult;
use crate::error::E2eResult;
use crate::loader::CaseFailure;

/// `project: <p>, test case: <n>, test status: <S>`
pub fn status_line(project: &str, name: &str, status: CaseStatus) -> String {
    format!(
        "project: {}, test case: {}, test status: {}",
        project, name, status
    )
}

/// One terminal status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaseRecord {
    pub reference: CaseReference,
    pub project: String,
    pub name: String,
    pub status: CaseStatus,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Result of running all cases
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub records: Vec<CaseRecord>,
}

impl RunSummary {
    /// Write the summary as pretty JSON, creating parent directories
    pub fn write_json(&self, path: &Path) -> E2eResult<PathBuf> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path.to_path_buf())
    }
}

/// Emits one status line per settled case and keeps the tally
#[derive(Debug)]
pub struct Reporter {
    started: Instant,
    records: Vec<CaseRecord>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

impl Reporter {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            records: Vec::new(),
        }
    }

    /// Report a case the engine finished
    pub fn report(&mut self, result: &SubmissionResult) {
        let case = &result.case;
        emit(&case.project, &case.name, case.status);
        self.records.push(CaseRecord {
            reference: result.reference.clone(),
            project: case.project.clone(),
            name: case.name.clone(),
            status: case.status,
            error: case.error.clone(),
            duration_ms: case.duration_ms,
        });
    }

    /// Report a case that never reached the engine
    pub fn report_failure(&mut self, failure: &CaseFailure) {
        error!("{}", failure.error);
        self.report_failed(&failure.reference, &failure.identity, failure.error.to_string());
    }

    pub(crate) fn report_failed(
        &mut self,
        reference: &CaseReference,
        identity: &CaseIdentity,
        error: String,
    ) {
        emit(&identity.project, &identity.name, CaseStatus::Fail);
        self.records.push(CaseRecord {
            reference: reference.clone(),
            project: identity.project.clone(),
            name: identity.name.clone(),
            status: CaseStatus::Fail,
            error: Some(error),
            duration_ms: 0,
        });
    }

    /// Number of status lines emitted so far
    pub fn reported(&self) -> usize {
        self.records.len()
    }

    pub fn finish(self) -> RunSummary {
        let passed = self
            .records
            .iter()
            .filter(|r| r.status == CaseStatus::Pass)
            .count();
        let total = self.records.len();
        let duration_ms = self.started.elapsed().as_millis() as u64;

        info!(
            "Test Results: {} passed, {} failed ({} ms)",
            passed,
            total - passed,
            duration_ms
        );

        RunSummary {
            total,
            passed,
            failed: total - passed,
            duration_ms,
            records: self.records,
        }
    }
}

fn emit(project: &str, name: &str, status: CaseStatus) {
    let line = status_line(project, name, status);
    match status {
        CaseStatus::Pass => info!("{}", line),
        CaseStatus::Fail => error!("{}", line),
    }
}
