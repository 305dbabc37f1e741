//! Failure taxonomy for a run.
//!
//! Collaborators report failures as `anyhow::Error`; the orchestrator tags each
//! one with the phase it escaped from. The outward [`RunFailure`] displays a
//! normalized message but keeps the tagged cause as its `source()`.

use std::fmt;

use thiserror::Error;

use crate::core::state::{RunPhase, TransitionError};
use crate::core::types::{CleanupStatus, PhaseStatus, SuiteKind};

#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("setup action '{key}' ({description}) failed")]
    Setup {
        key: String,
        description: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("pre-suite failed")]
    PreSuite(#[source] anyhow::Error),
    #[error("acceptance suite failed")]
    Acceptance(#[source] anyhow::Error),
    #[error("post-suite failed")]
    PostSuite(#[source] anyhow::Error),
    #[error("run interrupted during {phase}")]
    Interrupted { phase: RunPhase },
    #[error("host cleanup failed")]
    Cleanup(#[source] anyhow::Error),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl PhaseError {
    pub fn suite(kind: SuiteKind, source: anyhow::Error) -> Self {
        match kind {
            SuiteKind::PreSuite => PhaseError::PreSuite(source),
            SuiteKind::Acceptance => PhaseError::Acceptance(source),
            SuiteKind::PostSuite => PhaseError::PostSuite(source),
        }
    }

    /// Phase the failure escaped from.
    pub fn phase(&self) -> RunPhase {
        match self {
            PhaseError::Setup { .. } => RunPhase::Setup,
            PhaseError::PreSuite(_) => RunPhase::PreSuite,
            PhaseError::Acceptance(_) => RunPhase::Acceptance,
            PhaseError::PostSuite(_) => RunPhase::PostSuite,
            PhaseError::Interrupted { phase } => *phase,
            PhaseError::Cleanup(_) | PhaseError::Transition(_) => RunPhase::Finalizing,
        }
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, PhaseError::Interrupted { .. })
    }
}

/// Render an error and its sources joined by `": "`, like `{:#}` on `anyhow::Error`.
pub fn render_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut messages = vec![err.to_string()];
    let mut source = err.source();
    while let Some(next) = source {
        messages.push(next.to_string());
        source = next.source();
    }
    messages.join(": ")
}

/// One phase as it played out during a run.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PhaseRecord {
    pub phase: RunPhase,
    pub status: PhaseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub duration_ms: u64,
}

/// Bookkeeping shared by successful and failed runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub phases: Vec<PhaseRecord>,
    pub cleanup: CleanupStatus,
}

impl RunSummary {
    pub fn status_of(&self, phase: RunPhase) -> Option<PhaseStatus> {
        self.phases
            .iter()
            .rev()
            .find(|record| record.phase == phase)
            .map(|record| record.status)
    }
}

/// The error a caller sees when a run fails.
#[derive(Debug)]
pub struct RunFailure {
    /// The failure that ended the run.
    pub cause: PhaseError,
    /// Failures that happened while containing `cause` (post-suite, cleanup).
    pub secondary: Vec<PhaseError>,
    pub summary: RunSummary,
}

impl RunFailure {
    pub fn phase(&self) -> RunPhase {
        self.cause.phase()
    }
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to execute tests")
    }
}

impl std::error::Error for RunFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.cause)
    }
}

/// A single failed test inside a suite.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TestFailure {
    pub test: String,
    pub reason: String,
}

/// Aggregate failure raised by a suite runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteFailure {
    pub suite: String,
    pub total: usize,
    pub failed: Vec<TestFailure>,
    /// Tests never started because the suite stopped early.
    pub skipped: usize,
}

impl fmt::Display for SuiteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "suite '{}': {} of {} tests failed",
            self.suite,
            self.failed.len(),
            self.total
        )?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        Ok(())
    }
}

impl std::error::Error for SuiteFailure {}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    #[test]
    fn run_failure_keeps_structured_cause_as_source() {
        let failure = RunFailure {
            cause: PhaseError::Acceptance(anyhow!(SuiteFailure {
                suite: "acceptance".to_string(),
                total: 3,
                failed: vec![TestFailure {
                    test: "a1".to_string(),
                    reason: "exit status 1".to_string(),
                }],
                skipped: 0,
            })),
            secondary: Vec::new(),
            summary: RunSummary::default(),
        };

        assert_eq!(failure.to_string(), "failed to execute tests");
        assert_eq!(failure.phase(), RunPhase::Acceptance);

        let rendered = format!("{:#}", anyhow::Error::new(failure));
        assert_eq!(
            rendered,
            "failed to execute tests: acceptance suite failed: suite 'acceptance': 1 of 3 tests failed"
        );
    }

    #[test]
    fn suite_failure_mentions_skipped_tests() {
        let failure = SuiteFailure {
            suite: "pre-suite".to_string(),
            total: 4,
            failed: vec![TestFailure {
                test: "p1".to_string(),
                reason: "timed out".to_string(),
            }],
            skipped: 3,
        };
        assert_eq!(
            failure.to_string(),
            "suite 'pre-suite': 1 of 4 tests failed, 3 skipped"
        );
    }

    #[test]
    fn setup_failure_names_the_action() {
        let err = PhaseError::Setup {
            key: "timesync".to_string(),
            description: "sync time on hosts".to_string(),
            source: anyhow!("ntpdate exited 1"),
        };
        assert_eq!(err.phase(), RunPhase::Setup);
        assert_eq!(
            err.to_string(),
            "setup action 'timesync' (sync time on hosts) failed"
        );
    }
}
