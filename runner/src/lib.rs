//! Acceptance-test run orchestration.
//!
//! A run provisions hosts, applies setup actions, then executes the pre-suite,
//! acceptance and post-suite test suites before tearing the hosts down. The
//! architecture keeps a strict separation:
//!
//! - **[`core`]**: Pure logic (phase state machine, options, failure taxonomy).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config files, child processes,
//!   host fleet, reports). Behind traits so tests can script them.
//!
//! [`orchestrator`] coordinates the two; [`interrupt`] connects operator signals
//! to a running orchestrator.

pub mod core;
pub mod exit_codes;
pub mod interrupt;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
