//! Interaction event tap.
//!
//! An [`EventSource`] pushes [`InteractionEvent`]s into a bounded channel
//! from its own thread. The tap drains the channel, drops what the privacy
//! policy rejects, redacts metadata, appends each event to
//! `events_fine.jsonl` and folds it into coarse buckets written to
//! `events_coarse.json`.

use super::types::{BucketAggregator, EventCategory, InteractionEvent};
use super::{ensure_dir_blocking, write_json_blocking, CaptureContext, CaptureError, CaptureReport, CaptureWorker, WorkerKind};
use crate::environment::{probe_accessibility, Environment, HostProbe, Permission};
use crate::privacy::{PrivacyPolicy, Redactor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use serde_json::json;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const PROVIDER_QUARTZ: &str = "quartz_event_tap";
const PROVIDER_STUB: &str = "stub";

/// Capacity of the source-to-tap channel.
const CHANNEL_CAPACITY: usize = 10_000;

/// How long the tap blocks on the channel before re-checking cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Producer of interaction events.
///
/// `stream` runs on a dedicated thread and should return once it has nothing
/// more to send, once `cancel` fires, or once a send fails because the tap
/// went away.
pub trait EventSource: Send + Sync {
    fn stream(&self, origin: DateTime<Utc>, sink: Sender<InteractionEvent>, cancel: CancellationToken);
}

/// Deterministic four-event timeline spaced by the fine interval.
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    spacing: Duration,
}

impl SyntheticSource {
    pub fn new(spacing: Duration) -> Self {
        Self { spacing }
    }

    fn timeline(&self, origin: DateTime<Utc>) -> Vec<InteractionEvent> {
        let step = chrono::Duration::from_std(self.spacing).unwrap_or_else(|_| chrono::Duration::zero());
        vec![
            InteractionEvent::new(origin, EventCategory::Keyboard, "type", "compose")
                .with_meta("text", "Drafting email to support@example.com about rollout")
                .with_meta("app", "mail")
                .with_meta("url", "mailto:support@example.com"),
            InteractionEvent::new(origin + step, EventCategory::Mouse, "click", "submit-button")
                .with_meta("label", "Submit order")
                .with_meta("app", "checkout")
                .with_meta("url", "https://orders.example.com/checkout"),
            InteractionEvent::new(origin + step * 2, EventCategory::Window, "focus", "docs-app")
                .with_meta("title", "Roadmap token=abcd1234")
                .with_meta("app", "docs")
                .with_meta("url", "https://docs.example.com/roadmap"),
            InteractionEvent::new(origin + step * 3, EventCategory::Clipboard, "copy", "")
                .with_meta("preview", "Quarterly plan summary")
                .with_meta("app", "notes")
                .with_meta("url", "https://notes.example.com/q1"),
        ]
    }
}

impl EventSource for SyntheticSource {
    fn stream(&self, origin: DateTime<Utc>, sink: Sender<InteractionEvent>, cancel: CancellationToken) {
        for event in self.timeline(origin) {
            if cancel.is_cancelled() || sink.send(event).is_err() {
                return;
            }
        }
    }
}

/// Options for [`EventsWorker`].
#[derive(Debug, Clone)]
pub struct EventsOptions {
    pub fine_interval: Duration,
    pub coarse_interval: Duration,
    pub redactor: Redactor,
    pub privacy: PrivacyPolicy,
}

impl Default for EventsOptions {
    fn default() -> Self {
        Self {
            fine_interval: Duration::from_secs(10),
            coarse_interval: Duration::from_secs(60),
            redactor: Redactor::default(),
            privacy: PrivacyPolicy::default(),
        }
    }
}

/// Counts produced by one tap run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TapStats {
    pub fine_path: PathBuf,
    pub coarse_path: PathBuf,
    pub events: usize,
    pub buckets: usize,
    pub filtered: usize,
    pub first_event: Option<DateTime<Utc>>,
    pub last_event: Option<DateTime<Utc>>,
}

struct Tap {
    options: EventsOptions,
    source: Arc<dyn EventSource>,
}

pub struct EventsWorker {
    tap: Arc<Tap>,
    host: HostProbe,
}

impl EventsWorker {
    pub fn new(options: EventsOptions, host: HostProbe) -> Result<Self, CaptureError> {
        if options.fine_interval.is_zero() {
            return Err(CaptureError::invalid(WorkerKind::Events, "fine interval must be positive"));
        }
        if options.coarse_interval.is_zero() {
            return Err(CaptureError::invalid(WorkerKind::Events, "coarse interval must be positive"));
        }
        if options.coarse_interval < options.fine_interval {
            return Err(CaptureError::invalid(
                WorkerKind::Events,
                "coarse interval must be greater than or equal to fine interval",
            ));
        }
        let source = Arc::new(SyntheticSource::new(options.fine_interval));
        Ok(Self {
            tap: Arc::new(Tap { options, source }),
            host,
        })
    }

    /// Replace the synthetic source.
    pub fn with_source(self, source: Arc<dyn EventSource>) -> Self {
        let options = self.tap.options.clone();
        Self {
            tap: Arc::new(Tap { options, source }),
            host: self.host,
        }
    }
}

impl Tap {
    /// Drain the source into the fine and coarse artifacts. Blocking.
    fn run(&self, ctx: &CaptureContext, dest: &Path) -> Result<TapStats, CaptureError> {
        let dest = ensure_dir_blocking(dest)?;
        let fine_path = dest.join("events_fine.jsonl");
        let coarse_path = dest.join("events_coarse.json");

        let file = File::create(&fine_path).map_err(CaptureError::io("create fine events file"))?;
        let mut fine = BufWriter::new(file);

        let (sender, receiver) = bounded(CHANNEL_CAPACITY);
        let source = self.source.clone();
        let origin = (ctx.clock)();
        let source_cancel = ctx.cancel.child_token();
        let producer_cancel = source_cancel.clone();
        let producer = thread::Builder::new()
            .name("event-source".to_string())
            .spawn(move || source.stream(origin, sender, producer_cancel))
            .map_err(CaptureError::io("spawn event source"))?;

        let mut aggregator = BucketAggregator::new(self.options.coarse_interval);
        let mut stats = TapStats {
            fine_path,
            coarse_path,
            events: 0,
            buckets: 0,
            filtered: 0,
            first_event: None,
            last_event: None,
        };

        let drained = loop {
            if let Err(e) = ctx.checkpoint() {
                break Err(e);
            }
            let event = match receiver.recv_timeout(POLL_INTERVAL) {
                Ok(event) => event,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break Ok(()),
            };

            stats.first_event.get_or_insert(event.timestamp);
            if !self.options.privacy.allows(&event) {
                stats.filtered += 1;
                continue;
            }

            let mut redacted = event;
            redacted.metadata = self.options.redactor.apply_metadata(&redacted.metadata);
            if let Err(e) = append_line(&mut fine, &redacted) {
                break Err(e);
            }
            aggregator.add(&redacted);
            stats.events += 1;
            stats.last_event = Some(redacted.timestamp);
        };

        // Unblocks a producer parked on a full channel.
        source_cancel.cancel();
        drop(receiver);
        if producer.join().is_err() {
            debug!("event source thread panicked");
        }
        drained?;

        fine.flush().map_err(CaptureError::io("close fine events file"))?;

        let buckets = aggregator.finish();
        stats.buckets = buckets.len();
        write_json_blocking(&stats.coarse_path, &buckets, "coarse summary")?;
        Ok(stats)
    }
}

fn append_line(out: &mut impl Write, event: &InteractionEvent) -> Result<(), CaptureError> {
    serde_json::to_writer(&mut *out, event).map_err(CaptureError::encode("write fine event"))?;
    out.write_all(b"\n").map_err(CaptureError::io("write fine event"))
}

#[async_trait]
impl CaptureWorker for EventsWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Events
    }

    fn detect_environment(&self) -> Environment {
        let accessibility = probe_accessibility(&self.host);
        let mut env = Environment::new(PROVIDER_STUB).with_permission(accessibility.status);
        env.message = accessibility.message;
        env.guidance.extend(accessibility.guidance);

        if self.host.is_macos() {
            env.provider = PROVIDER_QUARTZ.to_string();
            if !env.available && env.message.is_empty() {
                env.message = "accessibility permission missing".to_string();
            }
        } else {
            env.permission = Permission::NotApplicable;
            env.available = true;
            if env.message.is_empty() {
                env.message = "synthetic event tap stub".to_string();
            }
        }

        if !env.available {
            env.provider = PROVIDER_STUB.to_string();
        }
        env
    }

    async fn capture(&self, ctx: CaptureContext, dest: &Path) -> Result<CaptureReport, CaptureError> {
        let tap = self.tap.clone();
        let dest = dest.to_path_buf();
        let stats = tokio::task::spawn_blocking(move || tap.run(&ctx, &dest))
            .await
            .map_err(|e| CaptureError::Failed(format!("event tap task: {e}")))??;
        Ok(CaptureReport {
            message: format!("{} fine events", stats.events),
            log_line: format!(
                "captured {} fine events ({} buckets, {} filtered)",
                stats.events, stats.buckets, stats.filtered
            ),
            files: vec![stats.fine_path.clone(), stats.coarse_path.clone()],
            items: stats.events,
            details: json!({
                "fine_path": stats.fine_path,
                "coarse_path": stats.coarse_path,
                "event_count": stats.events,
                "bucket_count": stats.buckets,
                "filtered_count": stats.filtered,
                "capture_start": stats.first_event,
                "capture_end": stats.last_event,
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::system_clock;
    use crate::environment::permissions::ACCESSIBILITY_VAR;
    use crate::privacy::PLACEHOLDER;
    use crate::worker::types::CoarseBucket;

    fn ctx() -> CaptureContext {
        CaptureContext::new(CancellationToken::new(), system_clock())
    }

    fn worker(options: EventsOptions) -> EventsWorker {
        EventsWorker::new(options, HostProbe::fixed("linux", &[], &[])).unwrap()
    }

    fn read_fine(path: &Path) -> Vec<InteractionEvent> {
        std::fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn test_rejects_inverted_intervals() {
        let options = EventsOptions {
            fine_interval: Duration::from_secs(60),
            coarse_interval: Duration::from_secs(10),
            ..EventsOptions::default()
        };
        let err = EventsWorker::new(options, HostProbe::fixed("linux", &[], &[])).err().unwrap();
        assert!(matches!(err, CaptureError::InvalidOptions { worker: WorkerKind::Events, .. }));
    }

    #[tokio::test]
    async fn test_capture_writes_redacted_fine_and_coarse() {
        let dir = tempfile::tempdir().unwrap();
        let options = EventsOptions {
            redactor: Redactor::new(true, &["token=[a-z0-9]+"]).unwrap(),
            ..EventsOptions::default()
        };

        let report = worker(options).capture(ctx(), dir.path()).await.unwrap();
        assert_eq!(report.message, "4 fine events");
        assert_eq!(report.items, 4);

        let events = read_fine(&dir.path().join("events_fine.jsonl"));
        assert_eq!(events.len(), 4);
        assert_eq!(
            events[0].metadata["text"],
            format!("Drafting email to {PLACEHOLDER} about rollout")
        );
        assert_eq!(events[2].metadata["title"], format!("Roadmap {PLACEHOLDER}"));

        let coarse: Vec<CoarseBucket> =
            serde_json::from_slice(&std::fs::read(dir.path().join("events_coarse.json")).unwrap()).unwrap();
        assert_eq!(coarse.iter().map(|b| b.count).sum::<usize>(), 4);
        assert!(report.log_line.starts_with("captured 4 fine events ("));
    }

    #[tokio::test]
    async fn test_privacy_policy_filters_events() {
        let dir = tempfile::tempdir().unwrap();
        let options = EventsOptions {
            privacy: PrivacyPolicy::new(&["docs"], &[], true),
            ..EventsOptions::default()
        };

        let report = worker(options).capture(ctx(), dir.path()).await.unwrap();
        assert_eq!(report.items, 1);
        assert_eq!(report.details["filtered_count"], 3);
        let events = read_fine(&dir.path().join("events_fine.jsonl"));
        assert_eq!(events[0].metadata["app"], "docs");
    }

    #[tokio::test]
    async fn test_cancelled_context_aborts_capture() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx();
        ctx.cancel.cancel();
        let err = worker(EventsOptions::default()).capture(ctx, dir.path()).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn test_probe_denied_accessibility_on_macos() {
        let host = HostProbe::fixed("macos", &[(ACCESSIBILITY_VAR, "denied")], &[]);
        let worker = EventsWorker::new(EventsOptions::default(), host).unwrap();
        let env = worker.detect_environment();
        assert!(!env.available);
        assert_eq!(env.provider, PROVIDER_STUB);
        assert_eq!(env.permission, Permission::Denied);
    }

    #[test]
    fn test_probe_non_mac_is_stub() {
        let env = worker(EventsOptions::default()).detect_environment();
        assert!(env.available);
        assert_eq!(env.provider, PROVIDER_STUB);
        assert_eq!(env.permission, Permission::NotApplicable);
        assert!(!env.message.is_empty());
    }
}
