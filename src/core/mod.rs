//! Session orchestration core.
//!
//! This module contains the concurrency layer of the agent:
//! - `controller`: shared Running/Paused/Stopping state machine
//! - `readiness`: one-shot screenshot → OCR dependency
//! - `watchdog`: session duration limit
//! - `supervisor`: per-worker gating, execution and outcome classification
//! - `orchestrator`: the public entry point that wires everything together

pub mod controller;
pub mod orchestrator;
pub mod readiness;
pub mod summary;
pub mod watchdog;

mod session;
mod supervisor;

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub use controller::{Controller, RunState, StateChange, StopCause, Subscription};
pub use orchestrator::{Orchestrator, RunError, RunReport};
pub use readiness::{Readiness, ReadyState};
pub use summary::{
    Lifecycle, OutcomeState, SkipReason, Summary, TerminationCause, WorkerDescriptor,
    WorkerOutcome,
};

/// Injected time source.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Wall-clock time.
pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
