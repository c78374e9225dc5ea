//! Screenshot scheduler.
//!
//! Grabs up to `max_per_minute` frames, one every `interval`, and writes each
//! as `screenshot_NNN.png` with a `screenshot_NNN.json` metadata sidecar. The
//! first frame is taken immediately; the wait between frames is cancellable.

use super::{ensure_dir, write_json, CaptureContext, CaptureError, CaptureReport, CaptureWorker, WorkerKind};
use crate::environment::{probe_screen_recording, Environment, HostProbe, Permission};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const PROVIDER_SCREENCAPTUREKIT: &str = "screencapturekit";
const PROVIDER_STUB: &str = "stub";

/// A 1x1 RGBA PNG.
const PLACEHOLDER_PNG: &[u8] = &[
    0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1F, 0x15, 0xC4,
    0x89, 0x00, 0x00, 0x00, 0x0A, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9C, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0D, 0x0A, 0x2D, 0xB4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4E, 0x44, 0xAE,
    0x42, 0x60, 0x82,
];

/// Sidecar written next to every frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub captured_at: DateTime<Utc>,
    pub backend: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pixel_format: String,
    #[serde(default)]
    pub scale: f64,
    #[serde(default)]
    pub image_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

impl FrameMetadata {
    /// Sidecar path for an image path.
    pub fn sidecar(image: &Path) -> PathBuf {
        image.with_extension("json")
    }
}

/// One grabbed frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub png: Vec<u8>,
    pub metadata: FrameMetadata,
}

/// Produces frames. Implementations may block briefly.
pub trait FrameSource: Send + Sync {
    fn grab(&self, index: usize, now: DateTime<Utc>) -> Result<Frame, CaptureError>;
}

/// Placeholder frames annotated with a fake focused window.
#[derive(Debug, Default, Clone)]
pub struct SyntheticFrames;

const SYNTHETIC_WINDOWS: [&str; 3] = [
    "Roadmap review - docs.example.com",
    "Inbox - mail from support@example.com",
    "Quarterly plan summary - notes",
];

impl FrameSource for SyntheticFrames {
    fn grab(&self, index: usize, now: DateTime<Utc>) -> Result<Frame, CaptureError> {
        let window = SYNTHETIC_WINDOWS[index % SYNTHETIC_WINDOWS.len()];
        Ok(Frame {
            png: PLACEHOLDER_PNG.to_vec(),
            metadata: FrameMetadata {
                captured_at: now,
                backend: "synthetic".to_string(),
                width: 1,
                height: 1,
                pixel_format: "RGBA".to_string(),
                scale: 1.0,
                image_path: String::new(),
                notes: vec![format!("window: {window}")],
            },
        })
    }
}

#[derive(Debug, Clone)]
pub struct ScreenshotOptions {
    pub interval: Duration,
    pub max_per_minute: u32,
}

impl Default for ScreenshotOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            max_per_minute: 3,
        }
    }
}

pub struct ScreenshotWorker {
    options: ScreenshotOptions,
    source: Arc<dyn FrameSource>,
    host: HostProbe,
}

impl ScreenshotWorker {
    pub fn new(options: ScreenshotOptions, host: HostProbe) -> Result<Self, CaptureError> {
        if options.interval.is_zero() {
            return Err(CaptureError::invalid(WorkerKind::Screenshots, "interval must be positive"));
        }
        if options.max_per_minute == 0 {
            return Err(CaptureError::invalid(
                WorkerKind::Screenshots,
                "max per minute must be positive",
            ));
        }
        Ok(Self {
            options,
            source: Arc::new(SyntheticFrames),
            host,
        })
    }

    pub fn with_source(mut self, source: Arc<dyn FrameSource>) -> Self {
        self.source = source;
        self
    }
}

#[async_trait]
impl CaptureWorker for ScreenshotWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Screenshots
    }

    fn detect_environment(&self) -> Environment {
        let screen = probe_screen_recording(&self.host);
        let mut env = Environment::new(PROVIDER_STUB).with_permission(screen.status);
        env.message = screen.message;
        env.guidance.extend(screen.guidance);

        if self.host.is_macos() {
            env.provider = PROVIDER_SCREENCAPTUREKIT.to_string();
            if !env.available && env.message.is_empty() {
                env.message = "screen recording permission missing".to_string();
            }
        } else {
            env.permission = Permission::NotApplicable;
            env.available = true;
            if env.message.is_empty() {
                env.message = "synthetic screenshot stub".to_string();
            }
        }

        if !env.available {
            env.provider = PROVIDER_STUB.to_string();
        }
        env
    }

    async fn capture(&self, ctx: CaptureContext, dest: &Path) -> Result<CaptureReport, CaptureError> {
        let dest = ensure_dir(dest).await?;
        let limit = self.options.max_per_minute as usize;
        let mut images = Vec::with_capacity(limit);
        let mut sidecars = Vec::with_capacity(limit);
        let mut first: Option<DateTime<Utc>> = None;
        let mut last: Option<DateTime<Utc>> = None;
        let mut next = Instant::now();

        for index in 0..limit {
            ctx.checkpoint()?;
            tokio::select! {
                _ = ctx.cancel.cancelled() => return Err(CaptureError::Cancelled),
                _ = tokio::time::sleep_until(next) => {}
            }

            let mut frame = self.source.grab(index, (ctx.clock)())?;
            if frame.png.is_empty() {
                return Err(CaptureError::Failed(
                    "capture provider returned empty PNG data".to_string(),
                ));
            }

            let name = format!("screenshot_{:03}", index + 1);
            let image = dest.join(format!("{name}.png"));
            tokio::fs::write(&image, &frame.png)
                .await
                .map_err(CaptureError::io(format!("write screenshot {name}")))?;

            frame.metadata.image_path = format!("{name}.png");
            let sidecar = FrameMetadata::sidecar(&image);
            write_json(&sidecar, &frame.metadata, &format!("metadata {name}")).await?;

            first.get_or_insert(frame.metadata.captured_at);
            last = Some(frame.metadata.captured_at);
            images.push(image);
            sidecars.push(sidecar);
            next += self.options.interval;
        }

        Ok(CaptureReport {
            message: format!("{} captures", images.len()),
            log_line: format!("captured {} screenshots", images.len()),
            items: images.len(),
            details: json!({
                "metadata_files": sidecars,
                "first_capture": first,
                "last_capture": last,
            }),
            files: images,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::system_clock;
    use crate::environment::permissions::SCREEN_RECORDING_VAR;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> CaptureContext {
        CaptureContext::new(CancellationToken::new(), system_clock())
    }

    fn worker(interval: Duration, max_per_minute: u32) -> ScreenshotWorker {
        let options = ScreenshotOptions {
            interval,
            max_per_minute,
        };
        ScreenshotWorker::new(options, HostProbe::fixed("linux", &[], &[])).unwrap()
    }

    struct Broken;

    impl FrameSource for Broken {
        fn grab(&self, _index: usize, _now: DateTime<Utc>) -> Result<Frame, CaptureError> {
            Err(CaptureError::PermissionRequired(
                "screen recording permission revoked".to_string(),
            ))
        }
    }

    #[test]
    fn test_rejects_zero_limit() {
        let options = ScreenshotOptions {
            max_per_minute: 0,
            ..ScreenshotOptions::default()
        };
        assert!(ScreenshotWorker::new(options, HostProbe::fixed("linux", &[], &[])).is_err());
    }

    #[tokio::test]
    async fn test_writes_frames_and_sidecars() {
        let dir = tempfile::tempdir().unwrap();
        let report = worker(Duration::from_millis(10), 3)
            .capture(ctx(), dir.path())
            .await
            .unwrap();

        assert_eq!(report.message, "3 captures");
        assert_eq!(report.files.len(), 3);
        assert_eq!(report.files[0], dir.path().join("screenshot_001.png"));
        for image in &report.files {
            assert_eq!(std::fs::read(image).unwrap(), PLACEHOLDER_PNG);
            let meta: FrameMetadata =
                serde_json::from_slice(&std::fs::read(FrameMetadata::sidecar(image)).unwrap()).unwrap();
            assert_eq!(meta.backend, "synthetic");
            assert!(image.ends_with(&meta.image_path));
            assert!(!meta.notes.is_empty());
        }
    }

    #[tokio::test]
    async fn test_cancel_between_frames() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        let cancel = ctx.cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        let err = worker(Duration::from_secs(60), 3)
            .capture(ctx, dir.path())
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        // The first frame is taken before the first wait.
        assert!(dir.path().join("screenshot_001.png").exists());
        assert!(!dir.path().join("screenshot_002.png").exists());
    }

    #[tokio::test]
    async fn test_source_permission_error_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let err = worker(Duration::from_millis(10), 1)
            .with_source(Arc::new(Broken))
            .capture(ctx(), dir.path())
            .await
            .unwrap_err();
        assert!(err.is_permission());
    }

    #[test]
    fn test_probe_macos_denied_falls_back_to_stub() {
        let host = HostProbe::fixed("macos", &[(SCREEN_RECORDING_VAR, "no")], &[]);
        let env = ScreenshotWorker::new(ScreenshotOptions::default(), host)
            .unwrap()
            .detect_environment();
        assert!(!env.available);
        assert_eq!(env.provider, PROVIDER_STUB);

        let host = HostProbe::fixed("macos", &[(SCREEN_RECORDING_VAR, "granted")], &[]);
        let env = ScreenshotWorker::new(ScreenshotOptions::default(), host)
            .unwrap()
            .detect_environment();
        assert!(env.available);
        assert_eq!(env.provider, PROVIDER_SCREENCAPTUREKIT);
        assert_eq!(env.permission, Permission::Granted);
    }
}
