//! Setup actions: named, idempotent environment preparation steps.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::io::config::SetupEntry;
use crate::io::fleet::Hosts;
use crate::io::process::{
    CommandLimits, command_from_argv, run_command_with_timeout, write_command_log,
};

type ActionFn = Box<dyn Fn() -> Result<()>>;

/// A single environment preparation step.
///
/// Actions must be safe to re-run: a failed run leaves completed actions in place
/// and the next run executes them again.
pub struct SetupAction {
    key: String,
    description: String,
    default_enabled: bool,
    action: ActionFn,
}

impl SetupAction {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        action: impl Fn() -> Result<()> + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            default_enabled: true,
            action: Box::new(action),
        }
    }

    /// Only run when explicitly enabled.
    pub fn disabled_by_default(mut self) -> Self {
        self.default_enabled = false;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn default_enabled(&self) -> bool {
        self.default_enabled
    }

    pub fn execute(&self) -> Result<()> {
        (self.action)()
    }
}

impl fmt::Debug for SetupAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SetupAction")
            .field("key", &self.key)
            .field("description", &self.description)
            .field("default_enabled", &self.default_enabled)
            .finish_non_exhaustive()
    }
}

/// Build setup actions that run each entry's command against `hosts`.
///
/// Commands run in `workdir` with the host environment; output goes to
/// `<log_dir>/setup/<key>.log`.
pub fn command_actions(
    entries: &[SetupEntry],
    hosts: &Hosts,
    workdir: &Path,
    log_dir: &Path,
    limits: CommandLimits,
) -> Vec<SetupAction> {
    entries
        .iter()
        .map(|entry| {
            let step = CommandStep {
                key: entry.key.clone(),
                argv: entry.command.clone(),
                hosts: hosts.clone(),
                workdir: workdir.to_path_buf(),
                log_path: log_dir.join("setup").join(format!("{}.log", entry.key)),
                limits,
            };
            let action = SetupAction::new(&entry.key, &entry.description, move || step.run());
            if entry.default_enabled {
                action
            } else {
                action.disabled_by_default()
            }
        })
        .collect()
}

struct CommandStep {
    key: String,
    argv: Vec<String>,
    hosts: Hosts,
    workdir: PathBuf,
    log_path: PathBuf,
    limits: CommandLimits,
}

impl CommandStep {
    fn run(&self) -> Result<()> {
        let mut cmd = command_from_argv(&self.argv)?;
        cmd.current_dir(&self.workdir);
        self.hosts.apply_env(&mut cmd);
        let output = run_command_with_timeout(cmd, &self.limits)
            .with_context(|| format!("run setup command for '{}'", self.key))?;
        write_command_log(&self.log_path, &self.key, &output)?;
        if let Some(reason) = output.failure_reason(&self.limits) {
            warn!(key = %self.key, reason = %reason, "setup command failed");
            return Err(anyhow!("{reason} (see {})", self.log_path.display()));
        }
        debug!(key = %self.key, "setup command succeeded");
        Ok(())
    }
}
