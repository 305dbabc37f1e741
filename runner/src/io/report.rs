//! JSON run report persisted after finalization.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::error::{PhaseRecord, RunFailure, RunSummary, render_chain};
use crate::core::state::RunPhase;
use crate::core::types::{CleanupStatus, FailureMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub outcome: ReportOutcome,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub fail_mode: FailureMode,
    pub phases: Vec<PhaseRecord>,
    pub cleanup: CleanupStatus,
    /// Phase the run failed in.
    pub failed_phase: Option<RunPhase>,
    /// Full cause chain of the failure.
    pub cause: Option<String>,
    pub secondary: Vec<String>,
}

impl RunReport {
    pub fn new(
        result: &std::result::Result<RunSummary, RunFailure>,
        fail_mode: FailureMode,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    ) -> Self {
        let duration_ms = (finished_at - started_at).num_milliseconds();
        match result {
            Ok(summary) => Self {
                outcome: ReportOutcome::Success,
                started_at,
                finished_at,
                duration_ms,
                fail_mode,
                phases: summary.phases.clone(),
                cleanup: summary.cleanup,
                failed_phase: None,
                cause: None,
                secondary: Vec::new(),
            },
            Err(failure) => Self {
                outcome: ReportOutcome::Failure,
                started_at,
                finished_at,
                duration_ms,
                fail_mode,
                phases: failure.summary.phases.clone(),
                cleanup: failure.summary.cleanup,
                failed_phase: Some(failure.phase()),
                cause: Some(render_chain(&failure.cause)),
                secondary: failure.secondary.iter().map(|err| render_chain(err)).collect(),
            },
        }
    }
}

/// Atomically write the report (temp file + rename).
pub fn write_report(path: &Path, report: &RunReport) -> Result<()> {
    debug!(path = %path.display(), outcome = ?report.outcome, "writing run report");
    let mut buf = serde_json::to_string_pretty(report).context("serialize run report")?;
    buf.push('\n');
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp report {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace report {}", path.display()))?;
    Ok(())
}

pub fn load_report(path: &Path) -> Result<RunReport> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read report {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse report {}", path.display()))
}
