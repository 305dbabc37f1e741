//! Shared deterministic types for the run orchestrator.
//!
//! These types define stable contracts between the orchestrator and its
//! collaborators. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Policy applied after any phase failure.
///
/// `Stop` skips every recovery and diagnostic phase (post-suite, host cleanup) and
/// propagates immediately, leaving hosts as-is for inspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum FailureMode {
    Stop,
    #[default]
    Continue,
}

impl FailureMode {
    pub fn is_stop(self) -> bool {
        self == FailureMode::Stop
    }
}

/// Only the literal `stop` selects [`FailureMode::Stop`]; anything else continues.
impl From<String> for FailureMode {
    fn from(value: String) -> Self {
        FailureMode::from(value.as_str())
    }
}

impl From<&str> for FailureMode {
    fn from(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("stop") {
            FailureMode::Stop
        } else {
            FailureMode::Continue
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureMode::Stop => f.write_str("stop"),
            FailureMode::Continue => f.write_str("continue"),
        }
    }
}

/// How a suite reacts to a failing test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStrategy {
    /// Abort the remaining tests of the suite at the first failure.
    FailFast,
    /// Run every test and aggregate the failures.
    BestEffort,
}

/// The three suites a run invokes, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SuiteKind {
    PreSuite,
    Acceptance,
    PostSuite,
}

impl SuiteKind {
    pub fn name(self) -> &'static str {
        match self {
            SuiteKind::PreSuite => "pre-suite",
            SuiteKind::Acceptance => "acceptance",
            SuiteKind::PostSuite => "post-suite",
        }
    }
}

impl fmt::Display for SuiteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of invoking a suite. Consumed immediately by the orchestrator.
#[derive(Debug)]
pub enum SuiteOutcome {
    Completed,
    Failed(anyhow::Error),
}

/// Per-phase status recorded in the run summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseStatus {
    Completed,
    Failed,
    Skipped,
}

/// What happened to host teardown during finalization.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupStatus {
    /// Finalization has not been reached.
    #[default]
    Pending,
    /// `HostFleet::cleanup` ran and succeeded.
    Completed,
    /// Cleanup was deliberately not invoked (fail mode `stop`, or interrupt policy).
    Skipped,
    /// `HostFleet::cleanup` ran and returned an error.
    Failed,
}
