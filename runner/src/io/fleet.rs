//! Host fleet abstraction and the command-backed implementation.
//!
//! The [`HostFleet`] owns host lifecycle. The orchestrator only borrows the
//! provisioned [`Hosts`] for the duration of a run and calls
//! [`HostFleet::cleanup`] at most once when it finalizes.

use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::process::{
    CommandLimits, command_from_argv, run_command_with_timeout, write_command_log,
};

/// Environment variable listing host names, comma-separated.
pub const HOSTS_ENV: &str = "ACCEPTANCE_HOSTS";
/// Environment variable listing `name=role1+role2` pairs, comma-separated.
pub const HOST_ROLES_ENV: &str = "ACCEPTANCE_HOST_ROLES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// The set of hosts a run executes against.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hosts {
    hosts: Vec<Host>,
}

impl Hosts {
    pub fn new(hosts: Vec<Host>) -> Self {
        Self { hosts }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Host> {
        self.hosts.iter()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.hosts.iter().map(|host| host.name.as_str()).collect()
    }

    /// Environment handed to every child process that acts on these hosts.
    pub fn env(&self) -> Vec<(&'static str, String)> {
        let roles = self
            .hosts
            .iter()
            .map(|host| format!("{}={}", host.name, host.roles.join("+")))
            .collect::<Vec<_>>()
            .join(",");
        vec![(HOSTS_ENV, self.names().join(",")), (HOST_ROLES_ENV, roles)]
    }

    pub fn apply_env(&self, cmd: &mut Command) {
        for (key, value) in self.env() {
            cmd.env(key, value);
        }
    }
}

/// Provisions hosts before a run and tears them down after.
pub trait HostFleet {
    fn provision(&self) -> Result<Hosts>;

    /// Tear the hosts down. Must be idempotent.
    fn cleanup(&self) -> Result<()>;
}

/// Fleet of statically declared hosts with optional provision/cleanup hooks.
#[derive(Debug)]
pub struct CommandFleet {
    hosts: Hosts,
    provision_command: Option<Vec<String>>,
    cleanup_command: Option<Vec<String>>,
    workdir: PathBuf,
    log_dir: PathBuf,
    limits: CommandLimits,
    cleaned: AtomicBool,
}

impl CommandFleet {
    pub fn new(hosts: Hosts, workdir: PathBuf, log_dir: PathBuf, limits: CommandLimits) -> Self {
        Self {
            hosts,
            provision_command: None,
            cleanup_command: None,
            workdir,
            log_dir,
            limits,
            cleaned: AtomicBool::new(false),
        }
    }

    pub fn with_provision_command(mut self, command: Option<Vec<String>>) -> Self {
        self.provision_command = command;
        self
    }

    pub fn with_cleanup_command(mut self, command: Option<Vec<String>>) -> Self {
        self.cleanup_command = command;
        self
    }

    fn run_hook(&self, label: &str, argv: &[String]) -> Result<()> {
        let mut cmd = command_from_argv(argv)?;
        cmd.current_dir(&self.workdir);
        self.hosts.apply_env(&mut cmd);
        let output = run_command_with_timeout(cmd, &self.limits)
            .with_context(|| format!("run fleet {label} command"))?;
        let log_path = self.log_dir.join("fleet").join(format!("{label}.log"));
        write_command_log(&log_path, label, &output)?;
        if let Some(reason) = output.failure_reason(&self.limits) {
            warn!(label, reason = %reason, log = %log_path.display(), "fleet command failed");
            return Err(anyhow!(
                "fleet {label} command failed: {reason} (see {})",
                log_path.display()
            ));
        }
        Ok(())
    }
}

impl HostFleet for CommandFleet {
    #[instrument(skip_all, fields(hosts = self.hosts.len()))]
    fn provision(&self) -> Result<Hosts> {
        if self.hosts.is_empty() {
            return Err(anyhow!("no hosts declared"));
        }
        if let Some(argv) = &self.provision_command {
            info!(hosts = ?self.hosts.names(), "provisioning hosts");
            self.run_hook("provision", argv)?;
        }
        Ok(self.hosts.clone())
    }

    #[instrument(skip_all)]
    fn cleanup(&self) -> Result<()> {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            debug!("hosts already cleaned up");
            return Ok(());
        }
        match &self.cleanup_command {
            Some(argv) => {
                info!(hosts = ?self.hosts.names(), "tearing down hosts");
                self.run_hook("cleanup", argv)
            }
            None => {
                debug!("no cleanup command configured");
                Ok(())
            }
        }
    }
}
