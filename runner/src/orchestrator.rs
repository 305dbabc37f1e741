//! Orchestration for a single acceptance run.
//!
//! A run walks setup, pre-suite, acceptance and post-suite in order, then
//! finalizes exactly once. Finalization decides whether hosts are torn down and
//! produces either a [`RunSummary`] or a [`RunFailure`]. Phase order is enforced
//! by [`PhaseMachine`], so nothing can run after cleanup has been decided.

use std::time::Instant;

use tracing::{debug, error, info, instrument, warn};

use crate::core::error::{PhaseError, PhaseRecord, RunFailure, RunSummary, render_chain};
use crate::core::options::RunOptions;
use crate::core::state::{PhaseMachine, RunPhase};
use crate::core::types::{CleanupStatus, PhaseStatus, SuiteKind, SuiteOutcome};
use crate::interrupt::{self, CancelToken, InterruptPolicy};
use crate::io::fleet::{HostFleet, Hosts};
use crate::io::setup::SetupAction;
use crate::io::suite::{SuiteRequest, SuiteRunner, run_suite};

/// Drives one run against provisioned hosts.
///
/// The fleet is expected to be provisioned already; `hosts` is what it returned.
pub struct RunOrchestrator<'a, S: SuiteRunner, F: HostFleet> {
    options: RunOptions,
    setup: Vec<SetupAction>,
    hosts: &'a Hosts,
    suites: &'a S,
    fleet: &'a F,
    interrupts: InterruptPolicy,
    token: CancelToken,
}

/// A failure on its way to finalization, plus anything that failed while
/// containing it.
struct Escape {
    cause: PhaseError,
    secondary: Vec<PhaseError>,
}

impl Escape {
    fn is_interrupted(&self) -> bool {
        self.cause.is_interrupted() || self.secondary.iter().any(PhaseError::is_interrupted)
    }
}

impl From<PhaseError> for Escape {
    fn from(cause: PhaseError) -> Self {
        Self {
            cause,
            secondary: Vec::new(),
        }
    }
}

#[derive(Default)]
struct RunContext {
    machine: PhaseMachine,
    summary: RunSummary,
}

impl RunContext {
    fn enter(&mut self, phase: RunPhase) -> Result<(), PhaseError> {
        self.machine.advance(phase)?;
        debug!(phase = %phase, "entering phase");
        Ok(())
    }

    fn record(
        &mut self,
        phase: RunPhase,
        status: PhaseStatus,
        detail: Option<String>,
        started: Instant,
    ) {
        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.summary.phases.push(PhaseRecord {
            phase,
            status,
            detail,
            duration_ms,
        });
    }
}

impl<'a, S: SuiteRunner, F: HostFleet> RunOrchestrator<'a, S, F> {
    pub fn new(
        options: RunOptions,
        setup: Vec<SetupAction>,
        hosts: &'a Hosts,
        suites: &'a S,
        fleet: &'a F,
    ) -> Self {
        Self {
            options,
            setup,
            hosts,
            suites,
            fleet,
            interrupts: InterruptPolicy::default(),
            token: CancelToken::new(),
        }
    }

    /// Use `policy` for operator interrupts and `token` as the cancellation flag.
    ///
    /// Share `token` with the suite runner so it can stop between tests.
    pub fn with_interrupts(mut self, policy: InterruptPolicy, token: CancelToken) -> Self {
        self.interrupts = policy;
        self.token = token;
        self
    }

    /// Run every phase and finalize.
    ///
    /// Cleanup is attempted exactly once unless the fail mode is `stop` and the
    /// run failed, in which case hosts are left as-is for inspection.
    #[instrument(skip_all, fields(fail_mode = %self.options.fail_mode))]
    pub fn execute(&self) -> Result<RunSummary, RunFailure> {
        let _guard = match interrupt::register(self.token.clone(), self.interrupts) {
            Ok(guard) => Some(guard),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "continuing without an interrupt handler");
                None
            }
        };

        let mut run = RunContext::default();
        let outcome = self.run_phases(&mut run);
        self.finalize(run, outcome)
    }

    fn run_phases(&self, run: &mut RunContext) -> Result<(), Escape> {
        run.enter(RunPhase::Setup)?;
        self.run_setup(run)?;

        run.enter(RunPhase::PreSuite)?;
        self.check_interrupt(RunPhase::PreSuite)?;
        self.run_suite_phase(run, SuiteKind::PreSuite)?;

        run.enter(RunPhase::Acceptance)?;
        self.check_interrupt(RunPhase::Acceptance)?;
        let acceptance = if self.options.install_only {
            info!("install only: skipping acceptance suite");
            run.record(
                RunPhase::Acceptance,
                PhaseStatus::Completed,
                Some("install only".to_string()),
                Instant::now(),
            );
            Ok(())
        } else {
            self.run_suite_phase(run, SuiteKind::Acceptance)
        };

        let cause = match acceptance {
            Ok(()) => {
                run.enter(RunPhase::PostSuite)?;
                self.check_interrupt(RunPhase::PostSuite)?;
                self.run_suite_phase(run, SuiteKind::PostSuite)?;
                return Ok(());
            }
            Err(cause) => cause,
        };

        let mut escape = Escape::from(cause);
        if escape.cause.is_interrupted() {
            return Err(escape);
        }
        if !self.options.post_suite_after_acceptance_failure() {
            info!("fail mode stop: skipping post-suite");
            run.record(
                RunPhase::PostSuite,
                PhaseStatus::Skipped,
                Some("fail mode stop".to_string()),
                Instant::now(),
            );
            return Err(escape);
        }

        // Post-suite still runs to collect diagnostics; its failure never
        // replaces the acceptance failure.
        if let Err(err) = run
            .enter(RunPhase::PostSuite)
            .and_then(|()| self.check_interrupt(RunPhase::PostSuite))
            .and_then(|()| self.run_suite_phase(run, SuiteKind::PostSuite))
        {
            warn!(
                err = %render_chain(&err),
                "post-suite failed after acceptance failure; reporting the acceptance failure"
            );
            escape.secondary.push(err);
        }
        Err(escape)
    }

    fn check_interrupt(&self, phase: RunPhase) -> Result<(), PhaseError> {
        if self.token.is_cancelled() {
            warn!(phase = %phase, "run interrupted; skipping remaining phases");
            return Err(PhaseError::Interrupted { phase });
        }
        Ok(())
    }

    fn run_setup(&self, run: &mut RunContext) -> Result<(), PhaseError> {
        let started = Instant::now();
        let mut executed = 0usize;
        for action in &self.setup {
            if let Err(err) = self.check_interrupt(RunPhase::Setup) {
                run.record(
                    RunPhase::Setup,
                    PhaseStatus::Failed,
                    Some("interrupted".to_string()),
                    started,
                );
                return Err(err);
            }
            if !self
                .options
                .setup_enabled(action.key(), action.default_enabled())
            {
                debug!(key = action.key(), "setup action disabled");
                continue;
            }

            info!(key = action.key(), "Setup: {}", action.description());
            if let Err(source) = action.execute() {
                run.record(
                    RunPhase::Setup,
                    PhaseStatus::Failed,
                    Some(format!("{}: {source:#}", action.key())),
                    started,
                );
                // SIGINT reaches the child too, so its failure is the interrupt.
                if self.token.is_cancelled() {
                    warn!(key = action.key(), err = %format!("{source:#}"), "setup stopped by interrupt");
                    return Err(PhaseError::Interrupted {
                        phase: RunPhase::Setup,
                    });
                }
                error!(key = action.key(), err = %format!("{source:#}"), "setup action failed");
                return Err(PhaseError::Setup {
                    key: action.key().to_string(),
                    description: action.description().to_string(),
                    source,
                });
            }
            executed += 1;
        }
        run.record(
            RunPhase::Setup,
            PhaseStatus::Completed,
            Some(format!("{executed} of {} actions ran", self.setup.len())),
            started,
        );
        Ok(())
    }

    fn run_suite_phase(&self, run: &mut RunContext, kind: SuiteKind) -> Result<(), PhaseError> {
        let started = Instant::now();
        let phase = RunPhase::from(kind);
        let options = self.options.suite_view(kind);
        let request = SuiteRequest {
            name: kind.name(),
            hosts: self.hosts,
            options: &options,
            strategy: self.options.strategy_for(kind),
        };

        match run_suite(self.suites, &request) {
            SuiteOutcome::Completed => {
                let detail = options.tests.is_empty().then(|| "no tests".to_string());
                run.record(phase, PhaseStatus::Completed, detail, started);
                Ok(())
            }
            SuiteOutcome::Failed(err) => {
                run.record(
                    phase,
                    PhaseStatus::Failed,
                    Some(format!("{err:#}")),
                    started,
                );
                if self.token.is_cancelled() {
                    warn!(suite = kind.name(), err = %format!("{err:#}"), "suite stopped by interrupt");
                    return Err(PhaseError::Interrupted { phase });
                }
                error!(suite = kind.name(), err = %format!("{err:#}"), "suite failed");
                Err(PhaseError::suite(kind, err))
            }
        }
    }

    /// An interrupt anywhere in the escape, including during post-suite
    /// containment, hands the decision to the interrupt policy.
    fn cleanup_after_failure(&self, escape: &Escape) -> bool {
        if !self.options.cleanup_after_failure() {
            return false;
        }
        if escape.is_interrupted() {
            return self.interrupts.cleanup;
        }
        true
    }

    fn finalize(
        &self,
        mut run: RunContext,
        outcome: Result<(), Escape>,
    ) -> Result<RunSummary, RunFailure> {
        let outcome = match (run.enter(RunPhase::Finalizing), outcome) {
            (Ok(()), outcome) => outcome,
            (Err(err), Ok(())) => Err(Escape::from(err)),
            (Err(err), Err(mut escape)) => {
                escape.secondary.push(err);
                Err(escape)
            }
        };
        let started = Instant::now();

        let mut escape = match outcome {
            Ok(()) => {
                info!("Cleanup: cleaning up after successful run");
                match self.fleet.cleanup() {
                    Ok(()) => {
                        run.summary.cleanup = CleanupStatus::Completed;
                        run.record(RunPhase::Finalizing, PhaseStatus::Completed, None, started);
                        if let Err(err) = run.enter(RunPhase::Succeeded) {
                            return self.fail(run, Escape::from(err));
                        }
                        info!("run succeeded");
                        return Ok(run.summary);
                    }
                    Err(err) => {
                        error!(err = %format!("{err:#}"), "host cleanup failed");
                        run.summary.cleanup = CleanupStatus::Failed;
                        run.record(
                            RunPhase::Finalizing,
                            PhaseStatus::Failed,
                            Some(format!("{err:#}")),
                            started,
                        );
                        return self.fail(run, Escape::from(PhaseError::Cleanup(err)));
                    }
                }
            }
            Err(escape) => escape,
        };

        info!("Cleanup: cleaning up after failed run");
        if self.cleanup_after_failure(&escape) {
            match self.fleet.cleanup() {
                Ok(()) => run.summary.cleanup = CleanupStatus::Completed,
                Err(err) => {
                    error!(err = %format!("{err:#}"), "host cleanup failed");
                    run.summary.cleanup = CleanupStatus::Failed;
                    escape.secondary.push(PhaseError::Cleanup(err));
                }
            }
        } else {
            let reason = if self.options.fail_mode.is_stop() {
                "fail mode stop"
            } else {
                "interrupt policy"
            };
            info!(reason, "leaving hosts in place");
            run.summary.cleanup = CleanupStatus::Skipped;
        }
        let status = match run.summary.cleanup {
            CleanupStatus::Failed => PhaseStatus::Failed,
            CleanupStatus::Skipped => PhaseStatus::Skipped,
            _ => PhaseStatus::Completed,
        };
        run.record(RunPhase::Finalizing, status, None, started);
        self.fail(run, escape)
    }

    fn fail(&self, mut run: RunContext, mut escape: Escape) -> Result<RunSummary, RunFailure> {
        if let Err(err) = run.enter(RunPhase::Failed) {
            escape.secondary.push(err);
        }
        error!(
            phase = %escape.cause.phase(),
            visited = ?run.machine.visited(),
            cause = %render_chain(&escape.cause),
            "run failed"
        );
        for err in &escape.secondary {
            warn!(err = %render_chain(err), "additional failure");
        }
        Err(RunFailure {
            cause: escape.cause,
            secondary: escape.secondary,
            summary: run.summary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{FailureMode, FailureStrategy};
    use crate::test_support::{RecordingFleet, ScriptedSuiteRunner, event_log, recording_action};

    fn options(fail_mode: FailureMode) -> RunOptions {
        RunOptions {
            pre_suite: vec!["pre/install.sh".to_string()],
            tests: vec!["tests/a.sh".to_string(), "tests/b.sh".to_string()],
            post_suite: vec!["post/collect.sh".to_string()],
            fail_mode,
            ..RunOptions::default()
        }
    }

    #[test]
    fn successful_run_visits_every_phase_and_cleans_up_once() {
        let events = event_log();
        let hosts = Hosts::default();
        let suites = ScriptedSuiteRunner::new(events.clone());
        let fleet = RecordingFleet::new(events.clone());
        let setup = vec![recording_action("validate", &events, false)];

        let summary = RunOrchestrator::new(
            options(FailureMode::Continue),
            setup,
            &hosts,
            &suites,
            &fleet,
        )
        .execute()
        .expect("run succeeds");

        assert_eq!(
            *events.borrow(),
            vec![
                "setup:validate",
                "suite:pre-suite",
                "suite:acceptance",
                "suite:post-suite",
                "cleanup",
            ]
        );
        assert_eq!(summary.cleanup, CleanupStatus::Completed);
        assert_eq!(
            summary.status_of(RunPhase::Finalizing),
            Some(PhaseStatus::Completed)
        );
        assert_eq!(fleet.cleanups(), 1);
    }

    #[test]
    fn acceptance_strategy_follows_fail_mode() {
        let events = event_log();
        let hosts = Hosts::default();
        let suites = ScriptedSuiteRunner::new(events.clone());
        let fleet = RecordingFleet::new(events.clone());

        let options = RunOptions {
            randomize: true,
            ..options(FailureMode::Stop)
        };

        RunOrchestrator::new(options, Vec::new(), &hosts, &suites, &fleet)
            .execute()
            .expect("run succeeds");

        let calls = suites.calls();
        assert_eq!(calls[0].strategy, FailureStrategy::FailFast);
        assert_eq!(calls[1].strategy, FailureStrategy::FailFast);
        assert_eq!(calls[2].strategy, FailureStrategy::BestEffort);
        let randomized: Vec<bool> = calls.iter().map(|call| call.randomize).collect();
        assert_eq!(randomized, vec![false, true, false]);
    }

    #[test]
    fn cleanup_failure_after_success_fails_the_run() {
        let events = event_log();
        let hosts = Hosts::default();
        let suites = ScriptedSuiteRunner::new(events.clone());
        let fleet = RecordingFleet::new(events.clone()).failing_cleanup();

        let failure = RunOrchestrator::new(
            options(FailureMode::Continue),
            Vec::new(),
            &hosts,
            &suites,
            &fleet,
        )
        .execute()
        .expect_err("cleanup failure surfaces");

        assert!(matches!(failure.cause, PhaseError::Cleanup(_)));
        assert_eq!(failure.phase(), RunPhase::Finalizing);
        assert_eq!(failure.summary.cleanup, CleanupStatus::Failed);
        assert_eq!(failure.to_string(), "failed to execute tests");
    }

    #[test]
    fn cleanup_failure_after_acceptance_failure_is_secondary() {
        let events = event_log();
        let hosts = Hosts::default();
        let suites = ScriptedSuiteRunner::new(events.clone()).failing("acceptance", "2 failed");
        let fleet = RecordingFleet::new(events.clone()).failing_cleanup();

        let failure = RunOrchestrator::new(
            options(FailureMode::Continue),
            Vec::new(),
            &hosts,
            &suites,
            &fleet,
        )
        .execute()
        .expect_err("acceptance fails");

        assert!(matches!(failure.cause, PhaseError::Acceptance(_)));
        assert_eq!(failure.secondary.len(), 1);
        assert!(matches!(failure.secondary[0], PhaseError::Cleanup(_)));
        assert_eq!(fleet.cleanups(), 1);
    }

    #[test]
    fn cancelled_token_before_start_skips_every_phase() {
        let events = event_log();
        let hosts = Hosts::default();
        let suites = ScriptedSuiteRunner::new(events.clone());
        let fleet = RecordingFleet::new(events.clone());
        let token = CancelToken::new();
        token.cancel();
        let setup = vec![recording_action("validate", &events, false)];

        let failure = RunOrchestrator::new(
            options(FailureMode::Continue),
            setup,
            &hosts,
            &suites,
            &fleet,
        )
        .with_interrupts(InterruptPolicy::default(), token)
        .execute()
        .expect_err("interrupted");

        assert!(failure.cause.is_interrupted());
        assert_eq!(failure.phase(), RunPhase::Setup);
        assert_eq!(*events.borrow(), vec!["cleanup"]);
    }
}
