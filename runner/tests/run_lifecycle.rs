//! Run-level tests for phase sequencing, failure containment and cleanup.
//!
//! These drive `RunOrchestrator::execute` with scripted collaborators, so every
//! side effect lands in a shared event log that the assertions read back.

use acceptance_runner::core::error::{PhaseError, RunFailure, RunSummary, SuiteFailure};
use acceptance_runner::core::options::RunOptions;
use acceptance_runner::core::state::RunPhase;
use acceptance_runner::core::types::{CleanupStatus, FailureMode, PhaseStatus};
use acceptance_runner::interrupt::{CancelToken, InterruptMode, InterruptPolicy};
use acceptance_runner::io::fleet::HostFleet;
use acceptance_runner::io::setup::SetupAction;
use acceptance_runner::orchestrator::RunOrchestrator;
use acceptance_runner::test_support::{
    EventLog, RecordingFleet, ScriptedSuiteRunner, event_log, recording_action,
};

fn tests(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn events_of(log: &EventLog) -> Vec<String> {
    log.borrow().clone()
}

struct Harness {
    events: EventLog,
    suites: ScriptedSuiteRunner,
    fleet: RecordingFleet,
}

impl Harness {
    fn new() -> Self {
        let events = event_log();
        Self {
            suites: ScriptedSuiteRunner::new(events.clone()),
            fleet: RecordingFleet::new(events.clone()),
            events,
        }
    }

    fn failing(mut self, suite: &str) -> Self {
        self.suites = self.suites.failing(suite, &format!("{suite} test failed"));
        self
    }

    fn execute(&self, options: RunOptions, setup: Vec<SetupAction>) -> Result<RunSummary, RunFailure> {
        let hosts = self.fleet.provision().expect("provision");
        RunOrchestrator::new(options, setup, &hosts, &self.suites, &self.fleet).execute()
    }
}

#[test]
fn empty_acceptance_still_runs_post_suite_and_cleans_up() {
    let harness = Harness::new();
    let options = RunOptions {
        post_suite: tests(&["t1"]),
        fail_mode: FailureMode::Continue,
        ..RunOptions::default()
    };
    let setup = vec![recording_action("timesync", &harness.events, false)];

    let summary = harness.execute(options, setup).expect("run succeeds");

    assert_eq!(
        events_of(&harness.events),
        vec!["setup:timesync", "suite:post-suite", "cleanup"]
    );
    assert_eq!(
        summary.status_of(RunPhase::Acceptance),
        Some(PhaseStatus::Completed)
    );
    assert_eq!(summary.cleanup, CleanupStatus::Completed);
    assert_eq!(harness.fleet.cleanups(), 1);
}

#[test]
fn pre_suite_failure_blocks_later_suites_but_cleans_up() {
    let harness = Harness::new().failing("pre-suite");
    let options = RunOptions {
        pre_suite: tests(&["p1"]),
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        fail_mode: FailureMode::Continue,
        ..RunOptions::default()
    };

    let failure = harness.execute(options, Vec::new()).expect_err("pre-suite fails");

    assert!(matches!(failure.cause, PhaseError::PreSuite(_)));
    assert_eq!(failure.phase(), RunPhase::PreSuite);
    assert!(!harness.suites.ran("acceptance"));
    assert!(!harness.suites.ran("post-suite"));
    assert_eq!(
        events_of(&harness.events),
        vec!["suite:pre-suite", "cleanup"]
    );
}

#[test]
fn pre_suite_failure_is_fatal_in_stop_mode_too() {
    let harness = Harness::new().failing("pre-suite");
    let options = RunOptions {
        pre_suite: tests(&["p1"]),
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        fail_mode: FailureMode::Stop,
        ..RunOptions::default()
    };

    let failure = harness.execute(options, Vec::new()).expect_err("pre-suite fails");

    assert!(matches!(failure.cause, PhaseError::PreSuite(_)));
    assert_eq!(events_of(&harness.events), vec!["suite:pre-suite"]);
    assert_eq!(failure.summary.cleanup, CleanupStatus::Skipped);
}

#[test]
fn stop_mode_acceptance_failure_skips_post_suite_and_cleanup() {
    let harness = Harness::new().failing("acceptance");
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        fail_mode: FailureMode::Stop,
        ..RunOptions::default()
    };

    let failure = harness.execute(options, Vec::new()).expect_err("acceptance fails");

    assert!(matches!(failure.cause, PhaseError::Acceptance(_)));
    assert!(!harness.suites.ran("post-suite"));
    assert_eq!(harness.fleet.cleanups(), 0);
    assert_eq!(
        failure.summary.status_of(RunPhase::PostSuite),
        Some(PhaseStatus::Skipped)
    );
    assert_eq!(
        failure.summary.status_of(RunPhase::Finalizing),
        Some(PhaseStatus::Skipped)
    );
}

#[test]
fn continue_mode_acceptance_failure_runs_post_suite_before_cleanup() {
    let harness = Harness::new().failing("acceptance");
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        fail_mode: FailureMode::Continue,
        ..RunOptions::default()
    };

    let failure = harness.execute(options, Vec::new()).expect_err("acceptance fails");

    assert!(matches!(failure.cause, PhaseError::Acceptance(_)));
    assert!(failure.secondary.is_empty());
    assert_eq!(
        events_of(&harness.events),
        vec!["suite:acceptance", "suite:post-suite", "cleanup"]
    );
    assert_eq!(harness.fleet.cleanups(), 1);
}

#[test]
fn post_suite_failure_does_not_mask_acceptance_failure() {
    let harness = Harness::new().failing("acceptance").failing("post-suite");
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        ..RunOptions::default()
    };

    let failure = harness.execute(options, Vec::new()).expect_err("acceptance fails");

    assert!(matches!(failure.cause, PhaseError::Acceptance(_)));
    assert_eq!(failure.secondary.len(), 1);
    assert!(matches!(failure.secondary[0], PhaseError::PostSuite(_)));
    assert_eq!(harness.fleet.cleanups(), 1);
}

#[test]
fn post_suite_failure_after_passing_acceptance_is_the_cause() {
    let harness = Harness::new().failing("post-suite");
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        ..RunOptions::default()
    };

    let failure = harness.execute(options, Vec::new()).expect_err("post-suite fails");

    assert!(matches!(failure.cause, PhaseError::PostSuite(_)));
    assert_eq!(failure.phase(), RunPhase::PostSuite);
    assert_eq!(harness.fleet.cleanups(), 1);
}

#[test]
fn install_only_skips_acceptance_but_runs_post_suite() {
    let harness = Harness::new();
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        install_only: true,
        ..RunOptions::default()
    };

    let summary = harness.execute(options, Vec::new()).expect("run succeeds");

    assert!(!harness.suites.ran("acceptance"));
    assert!(harness.suites.ran("post-suite"));
    assert_eq!(
        summary.status_of(RunPhase::Acceptance),
        Some(PhaseStatus::Completed)
    );
}

#[test]
fn disabled_setup_actions_never_run_and_failures_stop_the_rest() {
    let harness = Harness::new();
    let mut options = RunOptions {
        tests: tests(&["a1"]),
        ..RunOptions::default()
    };
    options.setup_toggles.insert("root_keys".to_string(), false);
    options.setup_toggles.insert("extra_repos".to_string(), true);
    let setup = vec![
        recording_action("timesync", &harness.events, false),
        recording_action("root_keys", &harness.events, false),
        recording_action("extra_repos", &harness.events, false).disabled_by_default(),
        recording_action("repo_proxy", &harness.events, true),
        recording_action("add_master_entry", &harness.events, false),
    ];

    let failure = harness.execute(options, setup).expect_err("setup fails");

    assert_eq!(
        events_of(&harness.events),
        vec![
            "setup:timesync",
            "setup:extra_repos",
            "setup:repo_proxy",
            "cleanup"
        ]
    );
    match &failure.cause {
        PhaseError::Setup { key, .. } => assert_eq!(key, "repo_proxy"),
        other => panic!("expected setup failure, got {other:?}"),
    }
    assert!(harness.suites.calls().is_empty());
}

#[test]
fn setup_failure_in_stop_mode_leaves_hosts() {
    let harness = Harness::new();
    let options = RunOptions {
        fail_mode: FailureMode::Stop,
        ..RunOptions::default()
    };
    let setup = vec![recording_action("timesync", &harness.events, true)];

    let failure = harness.execute(options, setup).expect_err("setup fails");

    assert_eq!(failure.phase(), RunPhase::Setup);
    assert_eq!(harness.fleet.cleanups(), 0);
}

#[test]
fn graceful_interrupt_stops_after_the_running_suite() {
    let events = event_log();
    let token = CancelToken::new();
    let suites = ScriptedSuiteRunner::new(events.clone()).cancelling_during("pre-suite", token.clone());
    let fleet = RecordingFleet::new(events.clone());
    let hosts = fleet.provision().expect("provision");
    let options = RunOptions {
        pre_suite: tests(&["p1"]),
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        ..RunOptions::default()
    };
    let policy = InterruptPolicy {
        mode: InterruptMode::Graceful,
        ..InterruptPolicy::default()
    };

    let failure = RunOrchestrator::new(options, Vec::new(), &hosts, &suites, &fleet)
        .with_interrupts(policy, token)
        .execute()
        .expect_err("interrupted");

    assert!(failure.cause.is_interrupted());
    assert_eq!(failure.phase(), RunPhase::PreSuite);
    assert_eq!(*events.borrow(), vec!["suite:pre-suite", "cleanup"]);
}

#[test]
fn interrupted_run_can_leave_hosts_for_inspection() {
    let events = event_log();
    let token = CancelToken::new();
    let suites = ScriptedSuiteRunner::new(events.clone()).cancelling_during("acceptance", token.clone());
    let fleet = RecordingFleet::new(events.clone());
    let hosts = fleet.provision().expect("provision");
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        ..RunOptions::default()
    };
    let policy = InterruptPolicy {
        mode: InterruptMode::Graceful,
        cleanup: false,
        ..InterruptPolicy::default()
    };

    let failure = RunOrchestrator::new(options, Vec::new(), &hosts, &suites, &fleet)
        .with_interrupts(policy, token)
        .execute()
        .expect_err("interrupted");

    assert_eq!(failure.phase(), RunPhase::Acceptance);
    assert!(!suites.ran("post-suite"));
    assert_eq!(fleet.cleanups(), 0);
    assert_eq!(failure.summary.cleanup, CleanupStatus::Skipped);
}

fn graceful_without_cleanup() -> InterruptPolicy {
    InterruptPolicy {
        mode: InterruptMode::Graceful,
        cleanup: false,
        ..InterruptPolicy::default()
    }
}

#[test]
fn setup_action_killed_by_interrupt_counts_as_interrupted() {
    let events = event_log();
    let token = CancelToken::new();
    let suites = ScriptedSuiteRunner::new(events.clone());
    let fleet = RecordingFleet::new(events.clone());
    let hosts = fleet.provision().expect("provision");
    let interrupted = token.clone();
    let setup = vec![
        recording_action("timesync", &events, false),
        SetupAction::new("root_keys", "Install root keys", move || {
            interrupted.cancel();
            anyhow::bail!("ssh-copy-id terminated by signal 2")
        }),
        recording_action("repo_proxy", &events, false),
    ];
    let options = RunOptions {
        tests: tests(&["a1"]),
        ..RunOptions::default()
    };

    let failure = RunOrchestrator::new(options, setup, &hosts, &suites, &fleet)
        .with_interrupts(graceful_without_cleanup(), token)
        .execute()
        .expect_err("interrupted");

    assert!(failure.cause.is_interrupted(), "cause: {:?}", failure.cause);
    assert_eq!(failure.phase(), RunPhase::Setup);
    assert_eq!(*events.borrow(), vec!["setup:timesync"]);
    assert_eq!(fleet.cleanups(), 0);
    assert_eq!(failure.summary.cleanup, CleanupStatus::Skipped);
}

#[test]
fn interrupt_during_post_suite_containment_follows_interrupt_policy() {
    let events = event_log();
    let token = CancelToken::new();
    let suites = ScriptedSuiteRunner::new(events.clone())
        .failing("acceptance", "a1 failed")
        .cancelling_during("post-suite", token.clone());
    let fleet = RecordingFleet::new(events.clone());
    let hosts = fleet.provision().expect("provision");
    let options = RunOptions {
        tests: tests(&["a1"]),
        post_suite: tests(&["t1"]),
        fail_mode: FailureMode::Continue,
        ..RunOptions::default()
    };

    let failure = RunOrchestrator::new(options, Vec::new(), &hosts, &suites, &fleet)
        .with_interrupts(graceful_without_cleanup(), token)
        .execute()
        .expect_err("acceptance fails");

    assert!(matches!(failure.cause, PhaseError::Acceptance(_)));
    assert_eq!(failure.secondary.len(), 1);
    assert!(failure.secondary[0].is_interrupted());
    assert_eq!(
        *events.borrow(),
        vec!["suite:acceptance", "suite:post-suite"]
    );
    assert_eq!(fleet.cleanups(), 0);
    assert_eq!(failure.summary.cleanup, CleanupStatus::Skipped);
}

#[test]
fn suite_failures_keep_their_structure_through_the_cause_chain() {
    struct FailingSuite;

    impl acceptance_runner::io::suite::SuiteRunner for FailingSuite {
        fn run(
            &self,
            request: &acceptance_runner::io::suite::SuiteRequest<'_>,
        ) -> anyhow::Result<()> {
            Err(anyhow::anyhow!(SuiteFailure {
                suite: request.name.to_string(),
                total: 3,
                failed: Vec::new(),
                skipped: 2,
            }))
        }
    }

    let events = event_log();
    let fleet = RecordingFleet::new(events);
    let hosts = fleet.provision().expect("provision");
    let options = RunOptions {
        tests: tests(&["a1"]),
        ..RunOptions::default()
    };

    let failure = RunOrchestrator::new(options, Vec::new(), &hosts, &FailingSuite, &fleet)
        .execute()
        .expect_err("acceptance fails");

    let PhaseError::Acceptance(source) = &failure.cause else {
        panic!("expected acceptance failure, got {:?}", failure.cause);
    };
    let suite = source
        .downcast_ref::<SuiteFailure>()
        .expect("suite failure preserved");
    assert_eq!(suite.suite, "acceptance");
    assert_eq!(suite.skipped, 2);
    assert_eq!(failure.to_string(), "failed to execute tests");
}
