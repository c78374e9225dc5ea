//! Shared run-state machine for one capture session.
//!
//! ```text
//!   Running ──pause──▶ Paused
//!      ▲                 │
//!      └─────resume──────┘
//!   Running | Paused ──kill──▶ Stopping (terminal)
//! ```
//!
//! Every mutation that changes the state is published to subscribers. The
//! state and subscriber channel are updated under one lock, so a new
//! subscriber sees each transition exactly once after its initial event.

use super::{lock, system_clock, Clock};
use crate::worker::CaptureError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Per-subscriber buffer. Older transitions are overwritten when a subscriber
/// falls behind; the terminal transition is always the newest message.
const SUBSCRIBER_BUFFER: usize = 16;

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Running,
    Paused,
    Stopping,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session entered `Stopping`.
#[derive(Debug, Clone, Error)]
pub enum StopCause {
    #[error("capture duration elapsed")]
    DurationElapsed,
    #[error("capture cancelled")]
    Cancelled,
    #[error("capture stopped")]
    Stopped,
    #[error("{0}")]
    Failed(Arc<CaptureError>),
}

impl StopCause {
    /// Short tag used in transition events.
    pub fn reason(&self) -> &'static str {
        match self {
            StopCause::DurationElapsed => "duration_elapsed",
            StopCause::Cancelled => "cancelled",
            StopCause::Stopped => "stopped",
            StopCause::Failed(_) => "error",
        }
    }

    /// True for the graceful causes: external stop or cancellation.
    pub fn is_stop_request(&self) -> bool {
        matches!(self, StopCause::Cancelled | StopCause::Stopped)
    }
}

/// A published state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateChange {
    pub state: RunState,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct Inner {
    state: RunState,
    cause: Option<StopCause>,
}

/// Pause/resume/stop coordinator consulted by every worker.
pub struct Controller {
    inner: Mutex<Inner>,
    state_tx: watch::Sender<RunState>,
    events: broadcast::Sender<StateChange>,
    clock: Clock,
}

impl Controller {
    /// Create a controller in the `Running` state.
    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Clock) -> Self {
        let (state_tx, _) = watch::channel(RunState::Running);
        let (events, _) = broadcast::channel(SUBSCRIBER_BUFFER);
        Self {
            inner: Mutex::new(Inner {
                state: RunState::Running,
                cause: None,
            }),
            state_tx,
            events,
            clock,
        }
    }

    /// Enter `Paused`. No-op when already paused or stopping.
    pub fn pause(&self) {
        let mut inner = lock(&self.inner);
        if inner.state != RunState::Running {
            return;
        }
        self.transition(&mut inner, RunState::Paused, "pause");
    }

    /// Leave `Paused` and release every blocked [`wait`](Self::wait).
    pub fn resume(&self) {
        let mut inner = lock(&self.inner);
        if inner.state != RunState::Paused {
            return;
        }
        self.transition(&mut inner, RunState::Running, "resume");
    }

    /// Enter `Stopping`. The first recorded cause is kept.
    ///
    /// Returns `true` when this call performed the transition, `false` when
    /// the controller was already stopping.
    pub fn kill(&self, cause: Option<StopCause>) -> bool {
        let mut inner = lock(&self.inner);
        if inner.cause.is_none() {
            inner.cause = cause;
        }
        if inner.state == RunState::Stopping {
            return false;
        }
        let reason = inner
            .cause
            .as_ref()
            .map(StopCause::reason)
            .unwrap_or("kill");
        self.transition(&mut inner, RunState::Stopping, reason);
        true
    }

    /// Block while paused.
    ///
    /// Returns `Ok` while running and the stop cause once stopping. If
    /// `cancel` fires while paused, the whole session is killed with
    /// [`StopCause::Cancelled`].
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<(), StopCause> {
        let mut state_rx = self.state_tx.subscribe();
        loop {
            {
                let inner = lock(&self.inner);
                match inner.state {
                    RunState::Running => return Ok(()),
                    RunState::Stopping => {
                        return Err(inner.cause.clone().unwrap_or(StopCause::Stopped));
                    }
                    RunState::Paused => {}
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    // A stop that raced the cancellation keeps its own cause.
                    self.kill(Some(StopCause::Cancelled));
                    return Err(self.cause().unwrap_or(StopCause::Cancelled));
                }
                changed = state_rx.changed() => {
                    if changed.is_err() {
                        return Err(StopCause::Stopped);
                    }
                }
            }
        }
    }

    /// Register a subscriber. The first event it yields describes the state
    /// at subscription time with reason `"initial"`.
    pub fn subscribe(&self) -> Subscription {
        let inner = lock(&self.inner);
        let rx = self.events.subscribe();
        Subscription {
            initial: Some(StateChange {
                state: inner.state,
                reason: "initial".to_string(),
                timestamp: (self.clock)(),
            }),
            rx,
        }
    }

    /// Snapshot for display only.
    pub fn state(&self) -> RunState {
        lock(&self.inner).state
    }

    /// The recorded stop cause, if any.
    pub fn cause(&self) -> Option<StopCause> {
        lock(&self.inner).cause.clone()
    }

    fn transition(&self, inner: &mut Inner, state: RunState, reason: &str) {
        inner.state = state;
        self.state_tx.send_replace(state);
        debug!(state = %state, reason, "controller transition");
        // No receivers is not an error.
        let _ = self.events.send(StateChange {
            state,
            reason: reason.to_string(),
            timestamp: (self.clock)(),
        });
    }
}

impl Default for Controller {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Controller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Controller")
            .field("inner", &*lock(&self.inner))
            .finish()
    }
}

/// Stream of transitions for one subscriber. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    initial: Option<StateChange>,
    rx: broadcast::Receiver<StateChange>,
}

impl Subscription {
    /// Next transition, skipping any overwritten while lagging. `None` once
    /// the controller is gone.
    pub async fn recv(&mut self) -> Option<StateChange> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.rx.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<StateChange> {
        if let Some(initial) = self.initial.take() {
            return Some(initial);
        }
        loop {
            match self.rx.try_recv() {
                Ok(change) => return Some(change),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}
