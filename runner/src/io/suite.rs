//! Suite runner abstraction and the command-backed implementation.
//!
//! The [`SuiteRunner`] trait decouples run orchestration from how tests are
//! executed. [`run_suite`] is the invocation wrapper the orchestrator uses: it
//! short-circuits empty suites and folds the runner's result into a
//! [`SuiteOutcome`]. Tests use scripted runners that return predetermined
//! outcomes without spawning processes.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow, bail};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use tracing::{info, instrument, warn};

use crate::core::error::{SuiteFailure, TestFailure};
use crate::core::options::SuiteOptions;
use crate::core::types::{FailureStrategy, SuiteOutcome};
use crate::interrupt::CancelToken;
use crate::io::fleet::Hosts;
use crate::io::process::{CommandLimits, run_command_with_timeout, write_command_log};

/// Environment variable naming the suite a test runs in.
pub const SUITE_ENV: &str = "ACCEPTANCE_SUITE";

/// Parameters for one suite invocation.
#[derive(Debug, Clone, Copy)]
pub struct SuiteRequest<'a> {
    pub name: &'a str,
    pub hosts: &'a Hosts,
    pub options: &'a SuiteOptions,
    pub strategy: FailureStrategy,
}

/// Executes a named collection of tests against a set of hosts.
pub trait SuiteRunner {
    /// Run every test in the request. Any failure is a single error carrying the
    /// aggregate cause (typically a [`SuiteFailure`]).
    fn run(&self, request: &SuiteRequest<'_>) -> Result<()>;
}

/// Invoke `runner` unless the suite has no tests.
#[instrument(skip_all, fields(suite = request.name, tests = request.options.tests.len()))]
pub fn run_suite<R: SuiteRunner + ?Sized>(runner: &R, request: &SuiteRequest<'_>) -> SuiteOutcome {
    if request.options.tests.is_empty() {
        info!("No tests to run for suite '{}'", request.name);
        return SuiteOutcome::Completed;
    }
    match runner.run(request) {
        Ok(()) => SuiteOutcome::Completed,
        Err(err) => SuiteOutcome::Failed(err),
    }
}

/// Runs each test file as a child process.
///
/// A test passes when it exits zero within the timeout. Test paths resolve
/// against `base_dir`; directories expand to every non-hidden file beneath them.
#[derive(Debug, Clone)]
pub struct CommandSuiteRunner {
    base_dir: PathBuf,
    log_dir: PathBuf,
    limits: CommandLimits,
    token: CancelToken,
}

#[derive(Debug)]
enum TestResult {
    Passed,
    Failed(String),
}

impl CommandSuiteRunner {
    pub fn new(base_dir: PathBuf, log_dir: PathBuf, limits: CommandLimits, token: CancelToken) -> Self {
        Self {
            base_dir,
            log_dir,
            limits,
            token,
        }
    }

    /// Expand the suite's entries into the ordered list of test files.
    pub fn plan(&self, options: &SuiteOptions) -> Result<Vec<PathBuf>> {
        let mut tests = expand_tests(&self.base_dir, &options.tests)?;
        if options.randomize {
            let seed = options.seed.unwrap_or_else(rand::random);
            info!(seed, "randomizing test order");
            shuffle_tests(&mut tests, seed);
        }
        Ok(tests)
    }

    fn run_test(&self, request: &SuiteRequest<'_>, index: usize, test: &Path) -> TestResult {
        let mut cmd = std::process::Command::new(test);
        cmd.current_dir(&self.base_dir).env(SUITE_ENV, request.name);
        request.hosts.apply_env(&mut cmd);

        let log_path = self
            .log_dir
            .join(request.name)
            .join(format!("{:03}-{}.log", index + 1, log_name(&self.base_dir, test)));

        let output = match run_command_with_timeout(cmd, &self.limits) {
            Ok(output) => output,
            Err(err) => return TestResult::Failed(format!("{err:#}")),
        };
        if let Err(err) = write_command_log(&log_path, "test", &output) {
            warn!(err = %err, log = %log_path.display(), "failed to write test log");
        }
        match output.failure_reason(&self.limits) {
            None => TestResult::Passed,
            Some(reason) => TestResult::Failed(reason),
        }
    }
}

impl SuiteRunner for CommandSuiteRunner {
    #[instrument(skip_all, fields(suite = request.name, strategy = ?request.strategy))]
    fn run(&self, request: &SuiteRequest<'_>) -> Result<()> {
        let tests = self
            .plan(request.options)
            .with_context(|| format!("plan suite '{}'", request.name))?;
        let total = tests.len();
        let mut passed = 0usize;
        let mut failed = Vec::new();
        let mut skipped = 0usize;

        for (index, test) in tests.iter().enumerate() {
            if self.token.is_cancelled() {
                warn!(remaining = total - index, "interrupted; skipping remaining tests");
                skipped = total - index;
                break;
            }
            let test_name = display_name(&self.base_dir, test);
            info!(test = %test_name, "running test");
            match self.run_test(request, index, test) {
                TestResult::Passed => passed += 1,
                TestResult::Failed(reason) => {
                    warn!(test = %test_name, reason = %reason, "test failed");
                    failed.push(TestFailure {
                        test: test_name,
                        reason,
                    });
                    if request.strategy == FailureStrategy::FailFast {
                        skipped = total - index - 1;
                        break;
                    }
                }
            }
        }

        info!(
            total,
            passed,
            failed = failed.len(),
            skipped,
            "suite '{}' finished",
            request.name
        );
        if failed.is_empty() && skipped == 0 {
            return Ok(());
        }
        Err(anyhow!(SuiteFailure {
            suite: request.name.to_string(),
            total,
            failed,
            skipped,
        }))
    }
}

/// Resolve test entries to files. Directories expand recursively in sorted order.
pub fn expand_tests(base_dir: &Path, entries: &[String]) -> Result<Vec<PathBuf>> {
    let mut tests = Vec::new();
    for entry in entries {
        let path = base_dir.join(entry);
        if path.is_dir() {
            let before = tests.len();
            collect_files(&path, &mut tests)?;
            if tests.len() == before {
                warn!(dir = %path.display(), "test directory contains no tests");
            }
        } else if path.is_file() {
            tests.push(path);
        } else {
            bail!("test path {} does not exist", path.display());
        }
    }
    Ok(tests)
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry.context("read entry")?;
        if entry.file_name().to_string_lossy().starts_with('.') {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    for path in entries {
        if path.is_dir() {
            collect_files(&path, out)?;
        } else if path.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

/// Deterministic shuffle: the same seed always yields the same order.
pub fn shuffle_tests(tests: &mut [PathBuf], seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    tests.shuffle(&mut rng);
}

fn display_name(base_dir: &Path, test: &Path) -> String {
    test.strip_prefix(base_dir)
        .unwrap_or(test)
        .display()
        .to_string()
}

fn log_name(base_dir: &Path, test: &Path) -> String {
    display_name(base_dir, test)
        .chars()
        .map(|ch| if ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' { ch } else { '_' })
        .collect()
}
