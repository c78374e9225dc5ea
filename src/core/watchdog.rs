//! Session duration limit.
//!
//! A bounded session logs its deadline, reports the remaining minutes once a
//! minute, and kills the controller with [`StopCause::DurationElapsed`] when
//! the deadline passes. An unbounded session only waits for teardown.

use super::controller::StopCause;
use super::session::Session;
use super::summary::TerminationCause;
use chrono::{DateTime, SecondsFormat, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Interval between remaining-time log lines.
pub const REMAINING_TICK: Duration = Duration::from_secs(60);

/// Handle to a running watchdog task.
pub(crate) struct Watchdog {
    handle: JoinHandle<()>,
    teardown: CancellationToken,
}

impl Watchdog {
    pub fn spawn(session: Arc<Session>, limit: Duration, tick: Duration) -> Self {
        let teardown = CancellationToken::new();
        let handle = tokio::spawn(watch(session, limit, tick, teardown.clone()));
        Self { handle, teardown }
    }

    /// Stop the timer and join the task.
    pub async fn shutdown(self) {
        self.teardown.cancel();
        if let Err(e) = self.handle.await {
            warn!(error = %e, "watchdog task failed");
        }
    }
}

async fn watch(session: Arc<Session>, limit: Duration, tick: Duration, teardown: CancellationToken) {
    let started_at = session.started_at();

    if limit.is_zero() {
        session.log.write(started_at, "controller", "run_started duration=unbounded");
        teardown.cancelled().await;
        return;
    }

    let deadline = deadline_label(started_at, limit);
    session.log.write(
        started_at,
        "controller",
        format_args!("run_started duration={} (deadline={})", format_duration(limit), deadline),
    );
    info!(duration = %format_duration(limit), deadline = %deadline, "capture deadline set");

    let expiry = time::sleep(limit);
    tokio::pin!(expiry);
    let mut ticker = time::interval_at(Instant::now() + tick, tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut remaining = limit;

    loop {
        tokio::select! {
            _ = teardown.cancelled() => return,
            _ = ticker.tick() => {
                remaining = remaining.saturating_sub(tick);
                let minutes = remaining.as_secs() / 60;
                if minutes > 0 {
                    session.write_log("controller", format_args!("remaining={minutes}m"));
                }
            }
            _ = &mut expiry => {
                session.write_log("controller", "duration elapsed; requesting stop");
                info!("capture duration elapsed");
                // A session already stopping keeps its own termination cause.
                if session.controller.kill(Some(StopCause::DurationElapsed)) {
                    session.mark_termination(TerminationCause::DurationElapsed);
                }
                return;
            }
        }
    }
}

fn deadline_label(started_at: DateTime<Utc>, limit: Duration) -> String {
    TimeDelta::from_std(limit)
        .ok()
        .and_then(|delta| started_at.checked_add_signed(delta))
        .map(|deadline| deadline.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "never".to_string())
}

/// `30m` for whole minutes, `1m30s`, `45s`, or milliseconds below a second.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }
    match (secs / 60, secs % 60) {
        (0, s) => format!("{s}s"),
        (m, 0) => format!("{m}m"),
        (m, s) => format!("{m}m{s}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::controller::{Controller, RunState};
    use crate::core::system_clock;
    use crate::transparency::CaptureLog;

    fn session(dir: &std::path::Path) -> Arc<Session> {
        let log = Arc::new(CaptureLog::open(dir.join("capture.log")).unwrap());
        Arc::new(Session::new(
            Arc::new(Controller::new()),
            CancellationToken::new(),
            log,
            system_clock(),
            false,
        ))
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(1800)), "30m");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
        assert_eq!(format_duration(Duration::from_millis(150)), "150ms");
    }

    #[tokio::test]
    async fn test_unbounded_watchdog_is_inert() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let watchdog = Watchdog::spawn(session.clone(), Duration::ZERO, REMAINING_TICK);
        time::sleep(Duration::from_millis(30)).await;
        watchdog.shutdown().await;

        assert_eq!(session.controller.state(), RunState::Running);
        let log = std::fs::read_to_string(dir.path().join("capture.log")).unwrap();
        assert!(log.contains("run_started duration=unbounded"));
    }

    #[tokio::test]
    async fn test_deadline_kills_with_duration_cause() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let watchdog = Watchdog::spawn(session.clone(), Duration::from_millis(50), REMAINING_TICK);
        time::sleep(Duration::from_millis(300)).await;
        watchdog.shutdown().await;

        assert_eq!(session.controller.state(), RunState::Stopping);
        assert!(matches!(
            session.controller.cause(),
            Some(StopCause::DurationElapsed)
        ));
        let summary = session.finish(&[]);
        assert_eq!(
            summary.lifecycle.termination_cause,
            Some(TerminationCause::DurationElapsed)
        );

        let log = std::fs::read_to_string(dir.path().join("capture.log")).unwrap();
        assert!(log.contains("run_started duration=50ms (deadline="));
        assert!(log.contains("duration elapsed; requesting stop"));
    }

    #[tokio::test]
    async fn test_teardown_before_deadline_has_no_effect() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());

        let watchdog = Watchdog::spawn(session.clone(), Duration::from_secs(600), REMAINING_TICK);
        time::sleep(Duration::from_millis(20)).await;
        watchdog.shutdown().await;

        assert_eq!(session.controller.state(), RunState::Running);
        assert!(session.controller.cause().is_none());
    }

    #[tokio::test]
    async fn test_deadline_after_stop_keeps_stop_cause() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        session.controller.kill(Some(StopCause::Stopped));

        let watchdog = Watchdog::spawn(session.clone(), Duration::from_millis(10), REMAINING_TICK);
        time::sleep(Duration::from_millis(200)).await;
        watchdog.shutdown().await;

        assert!(matches!(session.controller.cause(), Some(StopCause::Stopped)));
        let summary = session.finish(&[]);
        assert_eq!(summary.lifecycle.termination_cause, Some(TerminationCause::Stopped));
    }

    #[tokio::test]
    async fn test_existing_termination_cause_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let session = session(dir.path());
        session.mark_termination(TerminationCause::Error);

        let watchdog = Watchdog::spawn(session.clone(), Duration::from_millis(10), REMAINING_TICK);
        time::sleep(Duration::from_millis(200)).await;
        watchdog.shutdown().await;

        let summary = session.finish(&[]);
        assert_eq!(summary.lifecycle.termination_cause, Some(TerminationCause::Error));
    }
}
