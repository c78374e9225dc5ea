//! Session summary types.

use super::controller::StateChange;
use crate::environment::{join_message, Environment, Permission};
use crate::worker::{CaptureReport, WorkerKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Terminal state of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeState {
    Completed,
    Skipped,
    Unavailable,
    Errored,
}

impl OutcomeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeState::Completed => "completed",
            OutcomeState::Skipped => "skipped",
            OutcomeState::Unavailable => "unavailable",
            OutcomeState::Errored => "errored",
        }
    }
}

impl fmt::Display for OutcomeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a worker was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Disabled,
    DurationElapsed,
    ControllerStopped,
}

/// How the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    Completed,
    DurationElapsed,
    Error,
    Stopped,
}

impl TerminationCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminationCause::Completed => "completed",
            TerminationCause::DurationElapsed => "duration_elapsed",
            TerminationCause::Error => "error",
            TerminationCause::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration plus probe verdict for one worker, fixed before the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDescriptor {
    #[serde(rename = "name")]
    pub kind: WorkerKind,
    pub enabled: bool,
    pub available: bool,
    pub provider: String,
    pub permission: Permission,
    pub message: String,
}

impl WorkerDescriptor {
    pub fn new(kind: WorkerKind, enabled: bool, env: &Environment) -> Self {
        Self {
            kind,
            enabled,
            available: env.available,
            provider: env.provider.clone(),
            permission: env.permission,
            message: env.describe(),
        }
    }

    pub(crate) fn outcome(&self, state: OutcomeState, message: impl Into<String>) -> WorkerOutcome {
        WorkerOutcome {
            kind: self.kind,
            enabled: self.enabled,
            available: self.available,
            provider: self.provider.clone(),
            permission: self.permission,
            state,
            reason: None,
            message: message.into(),
        }
    }

    pub(crate) fn skipped(&self, reason: SkipReason, message: impl Into<String>) -> WorkerOutcome {
        WorkerOutcome {
            reason: Some(reason),
            ..self.outcome(OutcomeState::Skipped, message)
        }
    }

    /// Probe message extended with `detail`.
    pub(crate) fn message_with(&self, detail: &str) -> String {
        join_message(&self.message, &[detail])
    }
}

/// Exactly one per known worker after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerOutcome {
    #[serde(rename = "name")]
    pub kind: WorkerKind,
    pub enabled: bool,
    pub available: bool,
    pub provider: String,
    pub permission: Permission,
    pub state: OutcomeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<SkipReason>,
    pub message: String,
}

/// Session timing and termination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub termination_cause: Option<TerminationCause>,
    pub controller_timeline: Vec<StateChange>,
}

impl Lifecycle {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: None,
            termination_cause: None,
            controller_timeline: Vec::with_capacity(4),
        }
    }
}

/// Structured account of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub results: BTreeMap<WorkerKind, CaptureReport>,
    pub lifecycle: Lifecycle,
    pub outcomes: Vec<WorkerOutcome>,
}

impl Summary {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            results: BTreeMap::new(),
            lifecycle: Lifecycle::new(started_at),
            outcomes: Vec::new(),
        }
    }

    pub fn outcome(&self, kind: WorkerKind) -> Option<&WorkerOutcome> {
        self.outcomes.iter().find(|o| o.kind == kind)
    }

    pub fn result(&self, kind: WorkerKind) -> Option<&CaptureReport> {
        self.results.get(&kind)
    }

    /// Duration in seconds, once finished.
    pub fn duration_secs(&self) -> Option<i64> {
        self.lifecycle
            .finished_at
            .map(|end| (end - self.lifecycle.started_at).num_seconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_takes_probe_verdict() {
        let mut env = Environment::new("tesseract_stub");
        env.message = "tesseract binary missing".to_string();
        env.guidance = vec!["Install Tesseract OCR and expose it on PATH".to_string()];

        let descriptor = WorkerDescriptor::new(WorkerKind::Ocr, true, &env);
        assert!(descriptor.available);
        assert_eq!(
            descriptor.message,
            "tesseract binary missing; Install Tesseract OCR and expose it on PATH"
        );
    }

    #[test]
    fn test_skipped_outcome_carries_reason() {
        let env = Environment::new("stub");
        let descriptor = WorkerDescriptor::new(WorkerKind::Video, false, &env);
        let outcome = descriptor.skipped(SkipReason::Disabled, "disabled in config");
        assert_eq!(outcome.state, OutcomeState::Skipped);
        assert_eq!(outcome.reason, Some(SkipReason::Disabled));

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["name"], "video");
        assert_eq!(json["reason"], "disabled");
    }

    #[test]
    fn test_completed_outcome_omits_reason() {
        let env = Environment::new("stub");
        let outcome =
            WorkerDescriptor::new(WorkerKind::Events, true, &env).outcome(OutcomeState::Completed, "4 fine events");
        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("reason").is_none());
        assert_eq!(json["state"], "completed");
    }
}
