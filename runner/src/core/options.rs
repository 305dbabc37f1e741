//! Run options and the per-suite views derived from them.
//!
//! `RunOptions` is built once (config file plus CLI overrides) and never mutated
//! after the orchestrator is constructed.

use std::collections::BTreeMap;

use anyhow::{Result, bail};

use crate::core::types::{FailureMode, FailureStrategy, SuiteKind};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub pre_suite: Vec<String>,
    pub tests: Vec<String>,
    pub post_suite: Vec<String>,
    /// Provision and set up hosts, but skip the acceptance suite.
    pub install_only: bool,
    pub fail_mode: FailureMode,
    /// Shuffle the acceptance suite's test order.
    pub randomize: bool,
    /// Seed for `randomize`; drawn at random when unset.
    pub seed: Option<u64>,
    /// Explicit setup action toggles. Absent keys fall back to the action's default.
    pub setup_toggles: BTreeMap<String, bool>,
}

/// Options as seen by one suite: the run options with `tests` and `randomize`
/// overridden for that suite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteOptions {
    pub tests: Vec<String>,
    pub randomize: bool,
    pub seed: Option<u64>,
}

impl RunOptions {
    /// Derive the view handed to a suite runner. Only acceptance honours `randomize`.
    pub fn suite_view(&self, kind: SuiteKind) -> SuiteOptions {
        let (tests, randomize) = match kind {
            SuiteKind::PreSuite => (self.pre_suite.clone(), false),
            SuiteKind::Acceptance => (self.tests.clone(), self.randomize),
            SuiteKind::PostSuite => (self.post_suite.clone(), false),
        };
        SuiteOptions {
            tests,
            randomize,
            seed: self.seed,
        }
    }

    /// Failure strategy for a suite.
    ///
    /// Pre-suite is an environment gate and always fails fast; post-suite is a
    /// diagnostic pass and always reports everything. Acceptance stops at the first
    /// failing test only in `stop` mode.
    pub fn strategy_for(&self, kind: SuiteKind) -> FailureStrategy {
        match kind {
            SuiteKind::PreSuite => FailureStrategy::FailFast,
            SuiteKind::Acceptance if self.fail_mode.is_stop() => FailureStrategy::FailFast,
            SuiteKind::Acceptance | SuiteKind::PostSuite => FailureStrategy::BestEffort,
        }
    }

    /// Whether a setup action runs. An explicit toggle always wins over the
    /// action's default policy.
    pub fn setup_enabled(&self, key: &str, default_enabled: bool) -> bool {
        self.setup_toggles.get(key).copied().unwrap_or(default_enabled)
    }

    pub fn cleanup_after_failure(&self) -> bool {
        !self.fail_mode.is_stop()
    }

    pub fn post_suite_after_acceptance_failure(&self) -> bool {
        !self.fail_mode.is_stop()
    }
}

/// Command-line overrides layered on top of the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionOverrides {
    pub fail_mode: Option<FailureMode>,
    pub install_only: bool,
    pub randomize: bool,
    pub seed: Option<u64>,
    pub pre_suite: Option<Vec<String>>,
    pub tests: Option<Vec<String>>,
    pub post_suite: Option<Vec<String>>,
    pub enable: Vec<String>,
    pub disable: Vec<String>,
}

/// Apply CLI overrides to the base options.
///
/// `known_setup_keys` is the declared setup catalogue; toggling an undeclared key
/// is rejected rather than silently ignored.
pub fn apply_overrides(
    mut base: RunOptions,
    overrides: &OptionOverrides,
    known_setup_keys: &[&str],
) -> Result<RunOptions> {
    if let Some(fail_mode) = overrides.fail_mode {
        base.fail_mode = fail_mode;
    }
    if overrides.install_only {
        base.install_only = true;
    }
    if overrides.randomize {
        base.randomize = true;
    }
    if let Some(seed) = overrides.seed {
        base.seed = Some(seed);
    }
    if let Some(tests) = &overrides.pre_suite {
        base.pre_suite = tests.clone();
    }
    if let Some(tests) = &overrides.tests {
        base.tests = tests.clone();
    }
    if let Some(tests) = &overrides.post_suite {
        base.post_suite = tests.clone();
    }
    for key in &overrides.enable {
        if overrides.disable.contains(key) {
            bail!("setup action '{key}' cannot be both enabled and disabled");
        }
    }
    for (keys, value) in [(&overrides.enable, true), (&overrides.disable, false)] {
        for key in keys {
            if !known_setup_keys.contains(&key.as_str()) {
                bail!("unknown setup action '{key}'");
            }
            base.setup_toggles.insert(key.clone(), value);
        }
    }
    Ok(base)
}
