//! Run file (`acceptance.toml`) loading and validation.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::options::RunOptions;
use crate::core::types::FailureMode;
use crate::interrupt::{InterruptMode, InterruptPolicy};
use crate::io::fleet::{Host, Hosts};
use crate::io::process::CommandLimits;

/// A run file as written by humans.
///
/// Missing fields default; relative paths resolve against the file's directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RunFile {
    /// Environment sanity checks run before acceptance, fail-fast.
    pub pre_suite: Vec<String>,
    /// Acceptance tests (files or directories).
    pub tests: Vec<String>,
    /// Diagnostics run after acceptance, best-effort.
    pub post_suite: Vec<String>,
    pub install_only: bool,
    pub fail_mode: FailureMode,
    pub randomize: bool,
    pub seed: Option<u64>,
    /// Directory for per-command logs.
    pub log_dir: PathBuf,
    /// Where to write the JSON run report, if anywhere.
    pub report_path: Option<PathBuf>,
    /// Explicit `key = bool` toggles for declared setup actions.
    pub setup_toggles: BTreeMap<String, bool>,
    /// Declared setup actions, in execution order.
    pub setup: Vec<SetupEntry>,
    pub hosts: Vec<Host>,
    pub fleet: FleetConfig,
    pub execution: ExecutionConfig,
    pub interrupt: InterruptConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SetupEntry {
    pub key: String,
    pub description: String,
    pub command: Vec<String>,
    /// Whether the action runs when no toggle mentions it.
    #[serde(default = "default_true")]
    pub default_enabled: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct FleetConfig {
    pub provision_command: Option<Vec<String>>,
    pub cleanup_command: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutionConfig {
    /// Per-test wall-clock budget in seconds.
    pub test_timeout_secs: u64,
    /// Per-setup-action wall-clock budget in seconds.
    pub setup_timeout_secs: u64,
    /// Budget for fleet provision/cleanup hooks in seconds.
    pub fleet_timeout_secs: u64,
    /// Truncate captured stdout/stderr beyond this many bytes.
    pub output_limit_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InterruptConfig {
    pub mode: InterruptMode,
    /// Graceful mode only: tear hosts down after an interrupted run.
    pub cleanup: bool,
    /// Graceful mode only: force exit this long after the first interrupt.
    pub grace_period_secs: u64,
}

fn default_true() -> bool {
    true
}

impl Default for RunFile {
    fn default() -> Self {
        Self {
            pre_suite: Vec::new(),
            tests: Vec::new(),
            post_suite: Vec::new(),
            install_only: false,
            fail_mode: FailureMode::Continue,
            randomize: false,
            seed: None,
            log_dir: PathBuf::from("acceptance-logs"),
            report_path: None,
            setup_toggles: BTreeMap::new(),
            setup: Vec::new(),
            hosts: Vec::new(),
            fleet: FleetConfig::default(),
            execution: ExecutionConfig::default(),
            interrupt: InterruptConfig::default(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            test_timeout_secs: 30 * 60,
            setup_timeout_secs: 10 * 60,
            fleet_timeout_secs: 30 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

impl Default for InterruptConfig {
    fn default() -> Self {
        Self {
            mode: InterruptMode::Abort,
            cleanup: true,
            grace_period_secs: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn test_limits(&self) -> CommandLimits {
        self.limits(self.test_timeout_secs)
    }

    pub fn setup_limits(&self) -> CommandLimits {
        self.limits(self.setup_timeout_secs)
    }

    pub fn fleet_limits(&self) -> CommandLimits {
        self.limits(self.fleet_timeout_secs)
    }

    fn limits(&self, timeout_secs: u64) -> CommandLimits {
        CommandLimits {
            timeout: Duration::from_secs(timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

impl InterruptConfig {
    pub fn policy(&self) -> InterruptPolicy {
        InterruptPolicy {
            mode: self.mode,
            cleanup: self.cleanup,
            grace_period: Duration::from_secs(self.grace_period_secs),
        }
    }
}

impl RunFile {
    pub fn validate(&self) -> Result<()> {
        let execution = &self.execution;
        if execution.test_timeout_secs == 0 {
            return Err(anyhow!("execution.test_timeout_secs must be > 0"));
        }
        if execution.setup_timeout_secs == 0 {
            return Err(anyhow!("execution.setup_timeout_secs must be > 0"));
        }
        if execution.fleet_timeout_secs == 0 {
            return Err(anyhow!("execution.fleet_timeout_secs must be > 0"));
        }
        if execution.output_limit_bytes == 0 {
            return Err(anyhow!("execution.output_limit_bytes must be > 0"));
        }
        if self.interrupt.grace_period_secs == 0 {
            return Err(anyhow!("interrupt.grace_period_secs must be > 0"));
        }

        let mut keys = BTreeSet::new();
        for (index, entry) in self.setup.iter().enumerate() {
            if entry.key.trim().is_empty() {
                bail!("setup[{index}].key must be non-empty");
            }
            if !keys.insert(entry.key.as_str()) {
                bail!("duplicate setup key '{}'", entry.key);
            }
            validate_command(&entry.command)
                .with_context(|| format!("setup[{index}].command invalid"))?;
        }
        for key in self.setup_toggles.keys() {
            if !keys.contains(key.as_str()) {
                bail!("setup_toggles names undeclared setup action '{key}'");
            }
        }

        if self.hosts.is_empty() {
            bail!("hosts must be a non-empty array");
        }
        let mut names = BTreeSet::new();
        for host in &self.hosts {
            if host.name.trim().is_empty() {
                bail!("host name must be non-empty");
            }
            if host.name.contains(',') || host.name.contains('=') {
                bail!("host name '{}' must not contain ',' or '='", host.name);
            }
            if !names.insert(host.name.as_str()) {
                bail!("duplicate host name '{}'", host.name);
            }
        }

        if let Some(command) = &self.fleet.provision_command {
            validate_command(command).context("fleet.provision_command invalid")?;
        }
        if let Some(command) = &self.fleet.cleanup_command {
            validate_command(command).context("fleet.cleanup_command invalid")?;
        }
        for (field, tests) in [
            ("pre_suite", &self.pre_suite),
            ("tests", &self.tests),
            ("post_suite", &self.post_suite),
        ] {
            if tests.iter().any(|test| test.trim().is_empty()) {
                bail!("{field} entries must be non-empty");
            }
        }
        Ok(())
    }

    /// Run options as declared in the file, before CLI overrides.
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            pre_suite: self.pre_suite.clone(),
            tests: self.tests.clone(),
            post_suite: self.post_suite.clone(),
            install_only: self.install_only,
            fail_mode: self.fail_mode,
            randomize: self.randomize,
            seed: self.seed,
            setup_toggles: self.setup_toggles.clone(),
        }
    }

    pub fn setup_keys(&self) -> Vec<&str> {
        self.setup.iter().map(|entry| entry.key.as_str()).collect()
    }

    pub fn hosts(&self) -> Hosts {
        Hosts::new(self.hosts.clone())
    }
}

fn validate_command(command: &[String]) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        bail!("command must be a non-empty array");
    }
    Ok(())
}

/// Load and validate a run file.
pub fn load_run_file(path: &Path) -> Result<RunFile> {
    debug!(path = %path.display(), "loading run file");
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let file: RunFile =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    file.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(file)
}

/// Directory that relative paths in the run file resolve against.
pub fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
