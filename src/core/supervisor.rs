//! Per-worker supervision loop.
//!
//! Gates a worker on configuration, probe verdict and controller state, runs
//! its capture under the run scope, and classifies the result into exactly
//! one [`WorkerOutcome`].

use super::controller::StopCause;
use super::readiness::ReadyState;
use super::session::Session;
use super::summary::{OutcomeState, SkipReason, TerminationCause, WorkerDescriptor, WorkerOutcome};
use crate::worker::{CaptureContext, CaptureError, CaptureWorker, WorkerKind};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

pub(crate) async fn supervise(
    session: Arc<Session>,
    worker: Arc<dyn CaptureWorker>,
    descriptor: WorkerDescriptor,
    dest: PathBuf,
) {
    let outcome = run_worker(&session, worker.as_ref(), &descriptor, dest).await;
    if descriptor.kind == WorkerKind::Screenshots {
        // No-op when a successful capture already delivered its files.
        session.screenshots.notify_unavailable();
    }
    session.record(outcome);
}

async fn run_worker(
    session: &Session,
    worker: &dyn CaptureWorker,
    descriptor: &WorkerDescriptor,
    dest: PathBuf,
) -> WorkerOutcome {
    let kind = descriptor.kind;
    let name = kind.name();

    if !descriptor.enabled {
        session.write_log(name, "skipped (disabled in config)");
        info!(worker = name, "disabled via config");
        return descriptor.skipped(SkipReason::Disabled, "disabled in config");
    }

    if !descriptor.available {
        let message = if descriptor.message.is_empty() {
            "unavailable".to_string()
        } else {
            descriptor.message.clone()
        };
        session.write_log(name, format_args!("unavailable ({message})"));
        warn!(worker = name, message = %message, "worker unavailable");
        return descriptor.outcome(OutcomeState::Unavailable, message);
    }

    if let Err(cause) = session.controller.wait(&session.run_scope).await {
        return match cause {
            StopCause::DurationElapsed => {
                session.mark_termination(TerminationCause::DurationElapsed);
                session.write_log(name, "not run (duration elapsed)");
                descriptor.skipped(SkipReason::DurationElapsed, "not run (duration elapsed)")
            }
            StopCause::Cancelled | StopCause::Stopped => {
                session.write_log(name, "not run (controller stopped)");
                descriptor.skipped(SkipReason::ControllerStopped, "not run (controller stopped)")
            }
            StopCause::Failed(err) => {
                session.write_log(name, format_args!("not run ({err})"));
                session.mark_termination(TerminationCause::Error);
                session.set_error(err.clone());
                descriptor.outcome(OutcomeState::Errored, err.to_string())
            }
        };
    }

    let mut ctx = CaptureContext::new(session.run_scope.clone(), session.clock.clone());
    if kind == WorkerKind::Ocr && session.screenshots_enabled {
        let state = tokio::select! {
            state = session.screenshots.wait() => state,
            _ = session.run_scope.cancelled() => return cancelled(session, descriptor),
        };
        if state == ReadyState::Unavailable {
            info!(worker = name, "no screenshots delivered; processing empty input set");
        }
        ctx.inputs = state.into_payload();
    }

    info!(worker = name, provider = %descriptor.provider, "starting capture");
    match worker.capture(ctx, &dest).await {
        Ok(report) => {
            if !report.log_line.is_empty() {
                session.write_log(name, &report.log_line);
            }
            info!(worker = name, items = report.items, "capture complete");
            if kind == WorkerKind::Screenshots {
                session.screenshots.notify_ready(report.files.clone());
            }
            let message = if report.message.is_empty() {
                "completed".to_string()
            } else {
                report.message.clone()
            };
            session.merge_result(kind, report);
            descriptor.outcome(OutcomeState::Completed, message)
        }
        Err(CaptureError::Cancelled) => cancelled(session, descriptor),
        Err(err) if err.is_permission() => {
            let message = descriptor.message_with(&err.to_string());
            session.write_log(name, format_args!("unavailable ({message})"));
            warn!(worker = name, error = %err, "permission lost during capture");
            descriptor.outcome(OutcomeState::Unavailable, message)
        }
        Err(err) => {
            let err = Arc::new(err);
            session.write_log(name, format_args!("error: {err}"));
            error!(worker = name, error = %err, "capture failed; stopping session");
            session.set_error(err.clone());
            session.mark_termination(TerminationCause::Error);
            session.controller.kill(Some(StopCause::Failed(err.clone())));
            descriptor.outcome(OutcomeState::Errored, err.to_string())
        }
    }
}

fn cancelled(session: &Session, descriptor: &WorkerDescriptor) -> WorkerOutcome {
    let reason = session.stop_reason();
    let message = match reason {
        SkipReason::DurationElapsed => "cancelled (duration elapsed)",
        _ => "cancelled (controller stopped)",
    };
    session.write_log(descriptor.kind.name(), message);
    descriptor.skipped(reason, message)
}
