//! Run phase state machine.
//!
//! A run moves strictly forward through its phases. Any phase may bail out to
//! `Finalizing`, and `Finalizing` is the only way into a terminal state. Terminal
//! states are absorbing: once host cleanup has been decided nothing else may run.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::SuiteKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    Init,
    Setup,
    PreSuite,
    Acceptance,
    PostSuite,
    Finalizing,
    Succeeded,
    Failed,
}

impl RunPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Init => "init",
            RunPhase::Setup => "setup",
            RunPhase::PreSuite => "pre-suite",
            RunPhase::Acceptance => "acceptance",
            RunPhase::PostSuite => "post-suite",
            RunPhase::Finalizing => "finalizing",
            RunPhase::Succeeded => "succeeded",
            RunPhase::Failed => "failed",
        }
    }

    fn allowed_transitions(self) -> &'static [RunPhase] {
        match self {
            RunPhase::Init => &[RunPhase::Setup],
            RunPhase::Setup => &[RunPhase::PreSuite, RunPhase::Finalizing],
            RunPhase::PreSuite => &[RunPhase::Acceptance, RunPhase::Finalizing],
            RunPhase::Acceptance => &[RunPhase::PostSuite, RunPhase::Finalizing],
            RunPhase::PostSuite => &[RunPhase::Finalizing],
            RunPhase::Finalizing => &[RunPhase::Succeeded, RunPhase::Failed],
            RunPhase::Succeeded | RunPhase::Failed => &[],
        }
    }

    pub fn can_transition(self, to: RunPhase) -> bool {
        self.allowed_transitions().contains(&to)
    }
}

impl From<SuiteKind> for RunPhase {
    fn from(kind: SuiteKind) -> Self {
        match kind {
            SuiteKind::PreSuite => RunPhase::PreSuite,
            SuiteKind::Acceptance => RunPhase::Acceptance,
            SuiteKind::PostSuite => RunPhase::PostSuite,
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid run phase transition from {from} to {to}")]
pub struct TransitionError {
    pub from: RunPhase,
    pub to: RunPhase,
}

/// Tracks the current phase and every phase entered so far.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: RunPhase,
    visited: Vec<RunPhase>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: RunPhase::Init,
            visited: vec![RunPhase::Init],
        }
    }

    pub fn current(&self) -> RunPhase {
        self.current
    }

    pub fn visited(&self) -> &[RunPhase] {
        &self.visited
    }

    pub fn advance(&mut self, to: RunPhase) -> Result<(), TransitionError> {
        if !self.current.can_transition(to) {
            return Err(TransitionError {
                from: self.current,
                to,
            });
        }
        self.current = to;
        self.visited.push(to);
        Ok(())
    }
}
