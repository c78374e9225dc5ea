//! State shared by the tasks of one run.

use super::controller::{Controller, RunState, StateChange, StopCause};
use super::readiness::Readiness;
use super::summary::{SkipReason, Summary, TerminationCause, WorkerDescriptor, WorkerOutcome};
use super::{lock, Clock};
use crate::transparency::SharedCaptureLog;
use crate::worker::{CaptureError, CaptureReport, WorkerKind};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};
use tokio_util::sync::CancellationToken;

pub(crate) struct Session {
    pub controller: Arc<Controller>,
    /// Cancelled once the controller reaches `Stopping`.
    pub run_scope: CancellationToken,
    pub log: SharedCaptureLog,
    pub clock: Clock,
    pub screenshots: Readiness<Vec<PathBuf>>,
    pub screenshots_enabled: bool,
    summary: Mutex<Summary>,
    outcomes: Mutex<BTreeMap<WorkerKind, WorkerOutcome>>,
    error: OnceLock<Arc<CaptureError>>,
}

impl Session {
    pub fn new(
        controller: Arc<Controller>,
        run_scope: CancellationToken,
        log: SharedCaptureLog,
        clock: Clock,
        screenshots_enabled: bool,
    ) -> Self {
        let started_at = clock();
        Self {
            controller,
            run_scope,
            log,
            clock,
            screenshots: Readiness::new(),
            screenshots_enabled,
            summary: Mutex::new(Summary::new(started_at)),
            outcomes: Mutex::new(BTreeMap::new()),
            error: OnceLock::new(),
        }
    }

    pub fn started_at(&self) -> chrono::DateTime<chrono::Utc> {
        lock(&self.summary).lifecycle.started_at
    }

    /// Append a capture log line stamped with the session clock.
    pub fn write_log(&self, subsystem: &str, message: impl Display) {
        self.log.write((self.clock)(), subsystem, message);
    }

    /// Record a controller transition in the log and the timeline.
    pub fn observe(&self, change: StateChange) {
        self.log.write(
            change.timestamp,
            "controller",
            format_args!("state={} reason={}", change.state, change.reason),
        );
        lock(&self.summary).lifecycle.controller_timeline.push(change);
    }

    /// Set the termination cause unless one is already recorded.
    pub fn mark_termination(&self, cause: TerminationCause) {
        lock(&self.summary)
            .lifecycle
            .termination_cause
            .get_or_insert(cause);
    }

    /// Keep the first worker error.
    pub fn set_error(&self, err: Arc<CaptureError>) {
        let _ = self.error.set(err);
    }

    pub fn error(&self) -> Option<Arc<CaptureError>> {
        self.error.get().cloned()
    }

    pub fn merge_result(&self, kind: WorkerKind, report: CaptureReport) {
        lock(&self.summary).results.insert(kind, report);
    }

    /// Record an outcome. A worker keeps its first outcome.
    pub fn record(&self, outcome: WorkerOutcome) {
        lock(&self.outcomes).entry(outcome.kind).or_insert(outcome);
    }

    /// Skip reason for work interrupted by the controller.
    pub fn stop_reason(&self) -> SkipReason {
        match self.controller.cause() {
            Some(StopCause::DurationElapsed) => SkipReason::DurationElapsed,
            _ => SkipReason::ControllerStopped,
        }
    }

    /// Build the final summary once every worker task has returned.
    pub fn finish(&self, descriptors: &[WorkerDescriptor]) -> Summary {
        let mut outcomes = lock(&self.outcomes);
        let ordered: Vec<WorkerOutcome> = descriptors
            .iter()
            .map(|d| {
                outcomes.remove(&d.kind).unwrap_or_else(|| {
                    let message = if d.message.is_empty() {
                        "not run (controller stopped)".to_string()
                    } else {
                        d.message.clone()
                    };
                    d.skipped(SkipReason::ControllerStopped, message)
                })
            })
            .collect();
        drop(outcomes);

        let cause = self.controller.cause();
        let stopped = self.controller.state() == RunState::Stopping;
        let has_error = self.error.get().is_some();

        let mut summary = lock(&self.summary);
        summary.outcomes = ordered;
        let lifecycle = &mut summary.lifecycle;
        if lifecycle.finished_at.is_none() {
            lifecycle.finished_at = Some((self.clock)());
        }
        if lifecycle.termination_cause.is_none() {
            lifecycle.termination_cause = Some(if has_error {
                TerminationCause::Error
            } else {
                match cause {
                    Some(StopCause::DurationElapsed) => TerminationCause::DurationElapsed,
                    _ if stopped => TerminationCause::Stopped,
                    _ => TerminationCause::Completed,
                }
            });
        }
        summary.clone()
    }
}
