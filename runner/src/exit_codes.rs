//! Stable exit codes for the `acceptance` CLI.

/// Run succeeded, or `plan`/`validate` found nothing wrong.
pub const OK: i32 = 0;
/// Invalid invocation, config, or an error before the run started.
pub const INVALID: i32 = 1;
/// The run executed and failed in some phase.
pub const RUN_FAILED: i32 = 2;
/// The run was stopped by an operator interrupt (128 + SIGINT).
pub const INTERRUPTED: i32 = 130;
