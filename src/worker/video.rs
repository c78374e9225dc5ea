//! Video segment recorder.

use super::{ensure_dir, CaptureContext, CaptureError, CaptureReport, CaptureWorker, WorkerKind};
use crate::environment::{probe_screen_recording, Environment, HostProbe, Permission};
use async_trait::async_trait;
use chrono::{SecondsFormat, TimeDelta};
use serde_json::json;
use std::path::Path;
use std::time::Duration;

const PROVIDER_SCREENCAPTUREKIT: &str = "screencapturekit";
const PROVIDER_AVFOUNDATION: &str = "avfoundation";
const PROVIDER_STUB: &str = "stub";

/// Overrides the recording backend on macOS.
pub const BACKEND_VAR: &str = "LIMITLESS_VIDEO_BACKEND";

#[derive(Debug, Clone)]
pub struct VideoOptions {
    pub chunk: Duration,
    pub format: String,
}

impl Default for VideoOptions {
    fn default() -> Self {
        Self {
            chunk: Duration::from_secs(300),
            format: "webm".to_string(),
        }
    }
}

pub struct VideoWorker {
    chunk: Duration,
    format: String,
    host: HostProbe,
}

impl VideoWorker {
    pub fn new(options: VideoOptions, host: HostProbe) -> Result<Self, CaptureError> {
        if options.chunk.is_zero() {
            return Err(CaptureError::invalid(WorkerKind::Video, "chunk duration must be positive"));
        }
        let format = options.format.trim().to_lowercase();
        if format.is_empty() {
            return Err(CaptureError::invalid(WorkerKind::Video, "format must not be empty"));
        }
        Ok(Self {
            chunk: options.chunk,
            format,
            host,
        })
    }
}

#[async_trait]
impl CaptureWorker for VideoWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Video
    }

    fn detect_environment(&self) -> Environment {
        let screen = probe_screen_recording(&self.host);
        let status = screen.status;
        let mut env = Environment::new(PROVIDER_STUB).with_permission(status);
        env.message = screen.message;
        env.guidance.extend(screen.guidance);

        if self.host.is_macos() {
            let backend = self
                .host
                .var(BACKEND_VAR)
                .map(|b| b.trim().to_lowercase())
                .unwrap_or_default();
            env.provider = match backend.as_str() {
                "" => PROVIDER_SCREENCAPTUREKIT.to_string(),
                "avfoundation" => PROVIDER_AVFOUNDATION.to_string(),
                other => other.to_string(),
            };
            if status == Permission::Unavailable && env.provider != PROVIDER_STUB {
                env.available = false;
            }
            // The stub records nothing and needs no permission.
            if env.provider == PROVIDER_STUB {
                env.available = true;
            }
            if !env.available && env.message.is_empty() {
                env.message = "screen recording permission missing".to_string();
            }
        } else {
            env.permission = Permission::NotApplicable;
            env.available = true;
            if env.message.is_empty() {
                env.message = "non-mac platform; synthetic recorder".to_string();
            }
        }

        if env.provider == PROVIDER_STUB && env.message.is_empty() {
            env.message = "synthetic recorder stub".to_string();
        }
        env
    }

    async fn capture(&self, ctx: CaptureContext, dest: &Path) -> Result<CaptureReport, CaptureError> {
        let dest = ensure_dir(dest).await?;
        let started = (ctx.clock)();
        let ended = TimeDelta::from_std(self.chunk)
            .ok()
            .and_then(|delta| started.checked_add_signed(delta))
            .unwrap_or(started);
        let path = dest.join(format!("segment_0001.{}", self.format));
        let payload = format!(
            "synthetic video segment from {} to {}\n",
            started.to_rfc3339_opts(SecondsFormat::Secs, true),
            ended.to_rfc3339_opts(SecondsFormat::Secs, true),
        );

        ctx.checkpoint()?;
        tokio::fs::write(&path, payload)
            .await
            .map_err(CaptureError::io("write segment"))?;

        Ok(CaptureReport {
            message: format!("segment -> {}", path.display()),
            log_line: format!("captured segment {}", path.display()),
            items: 1,
            details: json!({ "file": path, "started": started, "ended": ended }),
            files: vec![path],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::system_clock;
    use crate::environment::permissions::SCREEN_RECORDING_VAR;
    use tokio_util::sync::CancellationToken;

    fn worker(host: HostProbe) -> VideoWorker {
        VideoWorker::new(VideoOptions::default(), host).unwrap()
    }

    #[test]
    fn test_rejects_blank_format() {
        let options = VideoOptions {
            format: "  ".to_string(),
            ..VideoOptions::default()
        };
        assert!(VideoWorker::new(options, HostProbe::fixed("linux", &[], &[])).is_err());
    }

    #[tokio::test]
    async fn test_writes_single_segment() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CaptureContext::new(CancellationToken::new(), system_clock());
        let report = worker(HostProbe::fixed("linux", &[], &[]))
            .capture(ctx, dir.path())
            .await
            .unwrap();

        let segment = dir.path().join("segment_0001.webm");
        assert_eq!(report.files, vec![segment.clone()]);
        let payload = std::fs::read_to_string(segment).unwrap();
        assert!(payload.starts_with("synthetic video segment from "));
        assert!(report.message.starts_with("segment -> "));
    }

    #[tokio::test]
    async fn test_cancelled_before_write() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = CaptureContext::new(CancellationToken::new(), system_clock());
        ctx.cancel.cancel();
        let err = worker(HostProbe::fixed("linux", &[], &[]))
            .capture(ctx, dir.path())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(!dir.path().join("segment_0001.webm").exists());
    }

    #[test]
    fn test_backend_override() {
        let host = HostProbe::fixed(
            "macos",
            &[(BACKEND_VAR, "AVFoundation"), (SCREEN_RECORDING_VAR, "granted")],
            &[],
        );
        let env = worker(host).detect_environment();
        assert_eq!(env.provider, PROVIDER_AVFOUNDATION);
        assert!(env.available);
    }

    #[test]
    fn test_unsupported_screen_recording_blocks_real_backend() {
        let host = HostProbe::fixed("macos", &[(SCREEN_RECORDING_VAR, "unsupported")], &[]);
        assert!(!worker(host).detect_environment().available);

        let host = HostProbe::fixed(
            "macos",
            &[(SCREEN_RECORDING_VAR, "unsupported"), (BACKEND_VAR, "stub")],
            &[],
        );
        let env = worker(host).detect_environment();
        assert!(env.available);
        assert_eq!(env.provider, PROVIDER_STUB);
    }

    #[test]
    fn test_non_mac_is_not_applicable() {
        let env = worker(HostProbe::fixed("linux", &[], &[])).detect_environment();
        assert!(env.available);
        assert_eq!(env.permission, Permission::NotApplicable);
    }
}
