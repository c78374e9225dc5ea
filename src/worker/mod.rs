//! Capture worker contract and the reference workers.
//!
//! The orchestrator only sees [`CaptureWorker`]: a probe that reports host
//! capability and a cancellable `capture` call that writes artifacts into a
//! directory. Everything platform specific stays behind that trait.

pub mod asr;
pub mod events;
pub mod ocr;
pub mod screenshots;
pub mod types;
pub mod video;

use crate::core::Clock;
use crate::environment::Environment;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use asr::AsrWorker;
pub use events::EventsWorker;
pub use ocr::OcrWorker;
pub use screenshots::ScreenshotWorker;
pub use video::VideoWorker;

/// Known worker kinds, in reporting order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Events,
    Screenshots,
    Video,
    Asr,
    Ocr,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 5] = [
        WorkerKind::Events,
        WorkerKind::Screenshots,
        WorkerKind::Video,
        WorkerKind::Asr,
        WorkerKind::Ocr,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkerKind::Events => "events",
            WorkerKind::Screenshots => "screenshots",
            WorkerKind::Video => "video",
            WorkerKind::Asr => "asr",
            WorkerKind::Ocr => "ocr",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure of a capture call.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The run scope was cancelled before the capture finished.
    #[error("capture cancelled")]
    Cancelled,

    /// The host revoked or never granted a required permission.
    #[error("{0}")]
    PermissionRequired(String),

    #[error("invalid {worker} options: {reason}")]
    InvalidOptions { worker: WorkerKind, reason: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{context}: {source}")]
    Encode {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Failed(String),
}

impl CaptureError {
    /// Adapter for `map_err` on I/O results.
    pub fn io(context: impl Into<String>) -> impl FnOnce(std::io::Error) -> Self {
        let context = context.into();
        move |source| CaptureError::Io { context, source }
    }

    /// Adapter for `map_err` on serde_json results.
    pub fn encode(context: impl Into<String>) -> impl FnOnce(serde_json::Error) -> Self {
        let context = context.into();
        move |source| CaptureError::Encode { context, source }
    }

    pub fn invalid(worker: WorkerKind, reason: impl Into<String>) -> Self {
        CaptureError::InvalidOptions {
            worker,
            reason: reason.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CaptureError::Cancelled)
    }

    pub fn is_permission(&self) -> bool {
        matches!(self, CaptureError::PermissionRequired(_))
    }
}

/// Per-call inputs handed to a worker.
#[derive(Clone)]
pub struct CaptureContext {
    /// Run-scope cancellation; workers must return [`CaptureError::Cancelled`]
    /// promptly once it fires.
    pub cancel: CancellationToken,
    /// Upstream artifacts (screenshot files for OCR).
    pub inputs: Vec<PathBuf>,
    pub clock: Clock,
}

impl CaptureContext {
    pub fn new(cancel: CancellationToken, clock: Clock) -> Self {
        Self {
            cancel,
            inputs: Vec::new(),
            clock,
        }
    }

    pub fn with_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.inputs = inputs;
        self
    }

    /// `Err(Cancelled)` once the run scope is cancelled.
    pub fn checkpoint(&self) -> Result<(), CaptureError> {
        if self.cancel.is_cancelled() {
            Err(CaptureError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaptureContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("inputs", &self.inputs)
            .finish()
    }
}

/// Result of a successful capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaptureReport {
    /// Short outcome message, e.g. `"4 fine events"`.
    pub message: String,
    /// Capture log line written on completion; empty to skip.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub log_line: String,
    /// Primary artifacts produced.
    pub files: Vec<PathBuf>,
    /// Number of items captured or processed.
    pub items: usize,
    /// Worker-specific details.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// A capture worker.
#[async_trait]
pub trait CaptureWorker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Report host capability. Called once per session, before capture.
    fn detect_environment(&self) -> Environment;

    /// Produce artifacts into `dest`.
    async fn capture(&self, ctx: CaptureContext, dest: &Path) -> Result<CaptureReport, CaptureError>;
}

fn check_dest(dest: &Path) -> Result<(), CaptureError> {
    if dest.as_os_str().is_empty() {
        return Err(CaptureError::Failed(
            "destination directory must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn encode_json<T: Serialize>(value: &T, what: &str) -> Result<Vec<u8>, CaptureError> {
    serde_json::to_vec_pretty(value).map_err(CaptureError::encode(format!("marshal {what}")))
}

/// Create `dest` and return it as an owned path.
pub(crate) async fn ensure_dir(dest: &Path) -> Result<PathBuf, CaptureError> {
    check_dest(dest)?;
    tokio::fs::create_dir_all(dest)
        .await
        .map_err(CaptureError::io("ensure destination"))?;
    Ok(dest.to_path_buf())
}

/// Write pretty JSON to `path`.
pub(crate) async fn write_json<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), CaptureError> {
    let payload = encode_json(value, what)?;
    tokio::fs::write(path, payload)
        .await
        .map_err(CaptureError::io(format!("write {what}")))
}

/// [`ensure_dir`] for code already on a blocking thread.
pub(crate) fn ensure_dir_blocking(dest: &Path) -> Result<PathBuf, CaptureError> {
    check_dest(dest)?;
    std::fs::create_dir_all(dest).map_err(CaptureError::io("ensure destination"))?;
    Ok(dest.to_path_buf())
}

/// [`write_json`] for code already on a blocking thread.
pub(crate) fn write_json_blocking<T: Serialize>(path: &Path, value: &T, what: &str) -> Result<(), CaptureError> {
    let payload = encode_json(value, what)?;
    std::fs::write(path, payload).map_err(CaptureError::io(format!("write {what}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_and_names() {
        let names: Vec<_> = WorkerKind::ALL.iter().map(WorkerKind::name).collect();
        assert_eq!(names, vec!["events", "screenshots", "video", "asr", "ocr"]);
        assert!(WorkerKind::Events < WorkerKind::Ocr);
    }

    #[test]
    fn test_error_classification() {
        assert!(CaptureError::Cancelled.is_cancelled());
        assert!(CaptureError::PermissionRequired("screen recording".into()).is_permission());
        assert!(!CaptureError::Failed("boom".into()).is_permission());
    }

    #[tokio::test]
    async fn test_json_helpers_write_into_created_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = ensure_dir(&tmp.path().join("ocr").join("nested")).await.unwrap();
        let path = dest.join("status.json");
        write_json(&path, &serde_json::json!({ "state": "ok" }), "status").await.unwrap();

        let back: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(back["state"], "ok");
        assert!(ensure_dir(Path::new("")).await.is_err());
        assert!(ensure_dir_blocking(Path::new("")).is_err());
    }

    #[test]
    fn test_io_adapter_keeps_context() {
        let err = std::fs::read("/definitely/not/here")
            .map_err(CaptureError::io("read screenshot"))
            .unwrap_err();
        assert!(err.to_string().starts_with("read screenshot: "));
    }

    #[test]
    fn test_checkpoint_observes_cancellation() {
        let ctx = CaptureContext::new(CancellationToken::new(), crate::core::system_clock());
        assert!(ctx.checkpoint().is_ok());
        ctx.cancel.cancel();
        assert!(ctx.checkpoint().unwrap_err().is_cancelled());
    }
}
