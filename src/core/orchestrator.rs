//! Session orchestrator.
//!
//! ```text
//!              ┌──────────────┐  transitions  ┌───────────────┐
//!  pause/kill ▶│  Controller  │──────────────▶│    fan-out    │──▶ capture log, timeline
//!              └──────────────┘               └───────────────┘        │ Stopping
//!                 ▲   wait()                                           ▼
//!   ┌─────────────┴──────────┐   readiness   ┌──────────┐        run scope cancelled
//!   │ supervise(screenshots) │──────────────▶│ supervise│
//!   │ supervise(events) ...  │               │  (ocr)   │
//!   └────────────────────────┘               └──────────┘
//!                 ▲ kill(DurationElapsed)
//!            ┌──────────┐
//!            │ watchdog │
//!            └──────────┘
//! ```

use super::controller::{Controller, RunState, StopCause, Subscription};
use super::session::Session;
use super::summary::{Summary, WorkerDescriptor};
use super::supervisor::supervise;
use super::watchdog::{Watchdog, REMAINING_TICK};
use super::{system_clock, Clock};
use crate::transparency::CaptureLog;
use crate::worker::{CaptureError, CaptureWorker, WorkerKind};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Failure to start a session at all.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("open capture log {}: {source}", path.display())]
    CaptureLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What a finished session produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub summary: Summary,
    /// First worker execution error, if any.
    pub error: Option<Arc<CaptureError>>,
}

impl RunReport {
    /// `Ok` for clean, duration-limited and stopped sessions.
    pub fn result(&self) -> Result<(), Arc<CaptureError>> {
        match &self.error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    pub fn is_failed(&self) -> bool {
        self.error.is_some()
    }
}

struct WorkerSlot {
    worker: Arc<dyn CaptureWorker>,
    enabled: bool,
    dest: PathBuf,
}

/// Owns one session: controller, watchdog and one supervision task per worker.
pub struct Orchestrator {
    capture_log: PathBuf,
    clock: Clock,
    controller: Arc<Controller>,
    duration: Duration,
    tick: Duration,
    workers: Vec<WorkerSlot>,
}

impl Orchestrator {
    pub fn new(capture_log: impl Into<PathBuf>) -> Self {
        let clock = system_clock();
        Self {
            capture_log: capture_log.into(),
            controller: Arc::new(Controller::with_clock(clock.clone())),
            clock,
            duration: Duration::ZERO,
            tick: REMAINING_TICK,
            workers: Vec::new(),
        }
    }

    /// Replace the clock. Also resets the controller so its events share it.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.controller = Arc::new(Controller::with_clock(clock.clone()));
        self.clock = clock;
        self
    }

    /// Session length limit; zero means unbounded.
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Interval of the watchdog's remaining-time log lines.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Register a worker writing into `dest`. A second worker of the same
    /// kind replaces the first.
    pub fn worker(mut self, worker: Arc<dyn CaptureWorker>, enabled: bool, dest: impl Into<PathBuf>) -> Self {
        let kind = worker.kind();
        self.workers.retain(|slot| slot.worker.kind() != kind);
        self.workers.push(WorkerSlot {
            worker,
            enabled,
            dest: dest.into(),
        });
        self.workers.sort_by_key(|slot| slot.worker.kind());
        self
    }

    /// The session controller, for external pause/resume/stop.
    pub fn controller(&self) -> Arc<Controller> {
        self.controller.clone()
    }

    /// Probe every registered worker.
    pub fn plan(&self) -> Vec<WorkerDescriptor> {
        self.workers
            .iter()
            .map(|slot| {
                let env = slot.worker.detect_environment();
                WorkerDescriptor::new(slot.worker.kind(), slot.enabled, &env)
            })
            .collect()
    }

    /// Run the session to completion.
    ///
    /// Returns once every worker has an outcome. Cancelling `cancel` stops
    /// the session the same way an external stop request does.
    pub async fn run(self, cancel: CancellationToken) -> Result<RunReport, RunError> {
        let log = CaptureLog::open(&self.capture_log).map_err(|source| RunError::CaptureLog {
            path: self.capture_log.clone(),
            source,
        })?;

        let descriptors = self.plan();
        let screenshots = descriptors.iter().find(|d| d.kind == WorkerKind::Screenshots);
        let screenshots_enabled = screenshots.is_some_and(|d| d.enabled);

        let run_scope = cancel.child_token();
        let session = Arc::new(Session::new(
            self.controller.clone(),
            run_scope,
            Arc::new(log),
            self.clock.clone(),
            screenshots_enabled,
        ));
        if !screenshots.is_some_and(|d| d.enabled && d.available) {
            session.screenshots.notify_unavailable();
        }

        let teardown = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let fan_out_task = tokio::spawn(fan_out(
            session.clone(),
            self.controller.subscribe(),
            cancel,
            teardown.clone(),
            ready_tx,
        ));
        // The initial transition is logged before anything else.
        let _ = ready_rx.await;

        let watchdog = Watchdog::spawn(session.clone(), self.duration, self.tick);

        info!(workers = descriptors.len(), "capture session started");
        let mut tasks = JoinSet::new();
        for (slot, descriptor) in self.workers.into_iter().zip(descriptors.iter().cloned()) {
            tasks.spawn(supervise(session.clone(), slot.worker, descriptor, slot.dest));
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "supervision task failed");
            }
        }

        watchdog.shutdown().await;
        teardown.cancel();
        if let Err(e) = fan_out_task.await {
            warn!(error = %e, "controller fan-out task failed");
        }

        let summary = session.finish(&descriptors);
        let error = session.error();
        let termination = summary
            .lifecycle
            .termination_cause
            .map_or("unknown", |cause| cause.as_str());
        info!(termination, failed = error.is_some(), "capture session finished");
        Ok(RunReport { summary, error })
    }
}

/// Forward controller transitions into the session and cancel the run scope
/// on `Stopping`. External cancellation is turned into a controller kill.
async fn fan_out(
    session: Arc<Session>,
    mut subscription: Subscription,
    external: CancellationToken,
    teardown: CancellationToken,
    ready: oneshot::Sender<()>,
) {
    let mut ready = Some(ready);
    let mut external_seen = false;

    loop {
        tokio::select! {
            change = subscription.recv() => {
                let Some(change) = change else { break };
                forward(&session, change);
                if let Some(tx) = ready.take() {
                    let _ = tx.send(());
                }
            }
            _ = external.cancelled(), if !external_seen => {
                external_seen = true;
                info!("external cancellation; stopping session");
                session.controller.kill(Some(StopCause::Cancelled));
            }
            _ = teardown.cancelled() => {
                while let Some(change) = subscription.try_recv() {
                    forward(&session, change);
                }
                break;
            }
        }
    }
}

fn forward(session: &Session, change: super::controller::StateChange) {
    let stopping = change.state == RunState::Stopping;
    session.observe(change);
    if stopping {
        session.run_scope.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::Environment;
    use crate::worker::{CaptureContext, CaptureReport};
    use async_trait::async_trait;
    use std::path::Path;

    struct Noop(WorkerKind);

    #[async_trait]
    impl CaptureWorker for Noop {
        fn kind(&self) -> WorkerKind {
            self.0
        }

        fn detect_environment(&self) -> Environment {
            Environment::new(format!("{}-fake", self.0))
        }

        async fn capture(&self, _ctx: CaptureContext, _dest: &Path) -> Result<CaptureReport, CaptureError> {
            Ok(CaptureReport::default())
        }
    }

    #[test]
    fn test_plan_is_ordered_by_kind() {
        let orchestrator = Orchestrator::new("capture.log")
            .worker(Arc::new(Noop(WorkerKind::Ocr)), true, "ocr")
            .worker(Arc::new(Noop(WorkerKind::Events)), false, "events")
            .worker(Arc::new(Noop(WorkerKind::Video)), true, "video");

        let plan = orchestrator.plan();
        let kinds: Vec<_> = plan.iter().map(|d| d.kind).collect();
        assert_eq!(kinds, vec![WorkerKind::Events, WorkerKind::Video, WorkerKind::Ocr]);
        assert!(!plan[0].enabled);
        assert_eq!(plan[2].provider, "ocr-fake");
    }

    #[test]
    fn test_same_kind_replaces_worker() {
        let orchestrator = Orchestrator::new("capture.log")
            .worker(Arc::new(Noop(WorkerKind::Asr)), false, "asr")
            .worker(Arc::new(Noop(WorkerKind::Asr)), true, "asr");
        let plan = orchestrator.plan();
        assert_eq!(plan.len(), 1);
        assert!(plan[0].enabled);
    }

    #[tokio::test]
    async fn test_unopenable_capture_log_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        // A directory cannot be opened as the log file.
        let result = Orchestrator::new(dir.path()).run(CancellationToken::new()).await;
        assert!(matches!(result, Err(RunError::CaptureLog { .. })));
    }

    #[tokio::test]
    async fn test_empty_session_completes() {
        let dir = tempfile::tempdir().unwrap();
        let report = Orchestrator::new(dir.path().join("capture.log"))
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert!(report.result().is_ok());
        assert!(report.summary.outcomes.is_empty());
        assert_eq!(report.summary.lifecycle.controller_timeline.len(), 1);
    }
}
