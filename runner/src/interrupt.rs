//! Operator interruption (SIGINT) handling.
//!
//! A single process-wide handler is installed lazily. While a run is executing it
//! registers its [`CancelToken`] and [`InterruptPolicy`]; the handler consults the
//! active registration when a signal arrives:
//!
//! - `abort`: log and terminate immediately. No phase resumes, no cleanup runs.
//! - `graceful`: trip the token so the orchestrator stops at the next phase
//!   boundary and finalizes. A second interrupt, or the grace period running out,
//!   terminates the process.
//!
//! Outside a run the handler always aborts.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::exit_codes;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterruptMode {
    #[default]
    Abort,
    Graceful,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptPolicy {
    pub mode: InterruptMode,
    /// Whether finalization tears hosts down after a graceful interrupt.
    pub cleanup: bool,
    pub grace_period: Duration,
}

impl Default for InterruptPolicy {
    fn default() -> Self {
        Self {
            mode: InterruptMode::Abort,
            cleanup: true,
            grace_period: Duration::from_secs(30),
        }
    }
}

/// Shared cancellation flag checked between phases and between tests.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

struct Registration {
    id: u64,
    token: CancelToken,
    policy: InterruptPolicy,
}

static ACTIVE: Mutex<Option<Registration>> = Mutex::new(None);
static NEXT_ID: AtomicU64 = AtomicU64::new(1);
static INSTALLED: OnceLock<std::result::Result<(), String>> = OnceLock::new();

fn active() -> MutexGuard<'static, Option<Registration>> {
    ACTIVE.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Keeps a run's registration alive; dropping it restores abort-on-interrupt.
#[derive(Debug)]
pub struct InterruptGuard {
    id: u64,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        let mut slot = active();
        if slot.as_ref().is_some_and(|reg| reg.id == self.id) {
            *slot = None;
            debug!("interrupt handler unregistered");
        }
    }
}

/// Register `token` and `policy` as the active run until the guard drops.
pub fn register(token: CancelToken, policy: InterruptPolicy) -> Result<InterruptGuard> {
    install()?;
    let id = NEXT_ID.fetch_add(1, Ordering::SeqCst);
    *active() = Some(Registration { id, token, policy });
    debug!(mode = ?policy.mode, "interrupt handler registered");
    Ok(InterruptGuard { id })
}

fn install() -> Result<()> {
    INSTALLED
        .get_or_init(|| ctrlc::set_handler(on_interrupt).map_err(|err| err.to_string()))
        .clone()
        .map_err(|err| anyhow!("install interrupt handler: {err}"))
}

/// What the handler should do for one signal, given the active registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaction {
    Exit,
    Cancel { grace_period: Duration },
}

fn react(registration: Option<&Registration>) -> Reaction {
    match registration {
        Some(reg) if reg.policy.mode == InterruptMode::Graceful && !reg.token.is_cancelled() => {
            reg.token.cancel();
            Reaction::Cancel {
                grace_period: reg.policy.grace_period,
            }
        }
        _ => Reaction::Exit,
    }
}

fn on_interrupt() {
    let reaction = react(active().as_ref());
    match reaction {
        Reaction::Exit => {
            warn!("Interrupt received; exiting...");
            std::process::exit(exit_codes::INTERRUPTED);
        }
        Reaction::Cancel { grace_period } => {
            warn!(
                grace_period_secs = grace_period.as_secs(),
                "Interrupt received; stopping after the current step (interrupt again to exit now)"
            );
            thread::spawn(move || {
                thread::sleep(grace_period);
                warn!("grace period elapsed; exiting");
                std::process::exit(exit_codes::INTERRUPTED);
            });
        }
    }
}
