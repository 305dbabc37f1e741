//! Test-only collaborators for driving runs without real hosts.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{Result, anyhow};

use crate::core::types::FailureStrategy;
use crate::interrupt::CancelToken;
use crate::io::fleet::{Host, HostFleet, Hosts};
use crate::io::setup::SetupAction;
use crate::io::suite::{SuiteRequest, SuiteRunner};

/// Ordered record of side effects shared between scripted collaborators.
pub type EventLog = Rc<RefCell<Vec<String>>>;

pub fn event_log() -> EventLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Write an executable shell script at `root/rel_path`.
#[cfg(unix)]
pub fn write_script(root: &Path, rel_path: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = root.join(rel_path);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("create script dir");
    }
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).expect("write script");
    let mut perms = fs::metadata(&path).expect("script metadata").permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).expect("chmod script");
    path
}

/// One invocation seen by [`ScriptedSuiteRunner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteCall {
    pub name: String,
    pub tests: Vec<String>,
    pub strategy: FailureStrategy,
    pub randomize: bool,
}

/// Suite runner returning predetermined outcomes per suite name.
///
/// Suites succeed unless marked with [`ScriptedSuiteRunner::failing`].
pub struct ScriptedSuiteRunner {
    failures: BTreeMap<String, String>,
    cancel_during: Option<(String, CancelToken)>,
    calls: RefCell<Vec<SuiteCall>>,
    events: EventLog,
}

impl ScriptedSuiteRunner {
    pub fn new(events: EventLog) -> Self {
        Self {
            failures: BTreeMap::new(),
            cancel_during: None,
            calls: RefCell::new(Vec::new()),
            events,
        }
    }

    pub fn failing(mut self, suite: &str, message: &str) -> Self {
        self.failures.insert(suite.to_string(), message.to_string());
        self
    }

    /// Trip `token` while `suite` runs, as a graceful interrupt would.
    pub fn cancelling_during(mut self, suite: &str, token: CancelToken) -> Self {
        self.cancel_during = Some((suite.to_string(), token));
        self
    }

    pub fn calls(&self) -> Vec<SuiteCall> {
        self.calls.borrow().clone()
    }

    pub fn ran(&self, suite: &str) -> bool {
        self.calls.borrow().iter().any(|call| call.name == suite)
    }
}

impl SuiteRunner for ScriptedSuiteRunner {
    fn run(&self, request: &SuiteRequest<'_>) -> Result<()> {
        self.calls.borrow_mut().push(SuiteCall {
            name: request.name.to_string(),
            tests: request.options.tests.clone(),
            strategy: request.strategy,
            randomize: request.options.randomize,
        });
        self.events
            .borrow_mut()
            .push(format!("suite:{}", request.name));

        if let Some((suite, token)) = &self.cancel_during
            && suite == request.name
        {
            token.cancel();
            return Err(anyhow!("suite '{}' stopped early", request.name));
        }
        match self.failures.get(request.name) {
            Some(message) => Err(anyhow!("{message}")),
            None => Ok(()),
        }
    }
}

/// Fleet that records cleanup calls instead of touching hosts.
pub struct RecordingFleet {
    hosts: Hosts,
    fail_cleanup: bool,
    cleanups: Cell<u32>,
    events: EventLog,
}

impl RecordingFleet {
    pub fn new(events: EventLog) -> Self {
        Self {
            hosts: Hosts::new(vec![Host {
                name: "agent-1".to_string(),
                roles: vec!["agent".to_string()],
            }]),
            fail_cleanup: false,
            cleanups: Cell::new(0),
            events,
        }
    }

    pub fn failing_cleanup(mut self) -> Self {
        self.fail_cleanup = true;
        self
    }

    pub fn cleanups(&self) -> u32 {
        self.cleanups.get()
    }
}

impl HostFleet for RecordingFleet {
    fn provision(&self) -> Result<Hosts> {
        Ok(self.hosts.clone())
    }

    fn cleanup(&self) -> Result<()> {
        self.cleanups.set(self.cleanups.get() + 1);
        self.events.borrow_mut().push("cleanup".to_string());
        if self.fail_cleanup {
            return Err(anyhow!("teardown command exited 1"));
        }
        Ok(())
    }
}

/// Setup action that appends `setup:<key>` to `events`, optionally failing.
pub fn recording_action(key: &str, events: &EventLog, fail: bool) -> SetupAction {
    let events = Rc::clone(events);
    let name = key.to_string();
    SetupAction::new(key, format!("{key} step"), move || {
        events.borrow_mut().push(format!("setup:{name}"));
        if fail {
            return Err(anyhow!("{name} exploded"));
        }
        Ok(())
    })
}

/// Temporary directory holding a run config plus the tests it references.
pub struct TestWorkspace {
    dir: tempfile::TempDir,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Write `run.toml` and return its path.
    pub fn write_config(&self, contents: &str) -> PathBuf {
        let path = self.dir.path().join("run.toml");
        fs::write(&path, contents).expect("write config");
        path
    }

    #[cfg(unix)]
    pub fn script(&self, rel_path: &str, body: &str) -> PathBuf {
        write_script(self.dir.path(), rel_path, body)
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
