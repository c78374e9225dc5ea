//! Offline Capture Agent - privacy-first, multi-worker capture supervisor.
//!
//! A session runs several independent capture workers (interaction events,
//! screenshots, video, meeting transcription, screenshot OCR) under one
//! pause/resume/stop controller, with an optional duration limit. Every
//! worker ends with exactly one reported outcome, and the session produces a
//! summary with a lifecycle record.
//!
//! # Privacy Guarantees
//!
//! - **Local only**: Nothing leaves the run directory
//! - **Allow-lists first**: Records outside the configured apps and URLs are dropped
//! - **Redaction before write**: Emails and configured patterns never reach disk
//! - **Transparency**: Every state change and worker result is in the capture log
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                      Offline Capture Agent                    │
//! ├───────────────────────────────────────────────────────────────┤
//! │  ┌────────────┐   ┌──────────────┐   ┌───────────────────┐    │
//! │  │ Controller │◀──│ Orchestrator │──▶│ supervise(worker) │ x5 │
//! │  │ run/pause/ │   │  + watchdog  │   │ probe, wait, run  │    │
//! │  │    stop    │   └──────────────┘   └───────────────────┘    │
//! │  └────────────┘          │                    │               │
//! │                          ▼                    ▼               │
//! │                   ┌─────────────┐     ┌───────────────┐       │
//! │                   │ Capture Log │     │ privacy:      │       │
//! │                   │ + Summary   │     │ policy/redact │       │
//! │                   └─────────────┘     └───────────────┘       │
//! └───────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use offline_capture_agent::environment::HostProbe;
//! use offline_capture_agent::worker::{video::VideoOptions, VideoWorker};
//! use offline_capture_agent::Orchestrator;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let video = VideoWorker::new(VideoOptions::default(), HostProbe::system())?;
//! let report = Orchestrator::new("runs/demo/capture.log")
//!     .worker(Arc::new(video), true, "runs/demo/video")
//!     .run(CancellationToken::new())
//!     .await?;
//! println!("{:?}", report.summary.lifecycle.termination_cause);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod environment;
pub mod logging;
pub mod manifest;
pub mod privacy;
pub mod transparency;
pub mod worker;

// Re-export key types at crate root for convenience
pub use config::{Config, ConfigError};
pub use core::{
    Controller, Orchestrator, RunError, RunReport, RunState, StopCause, Summary, TerminationCause,
    WorkerOutcome,
};
pub use manifest::{Layout, Manifest};
pub use privacy::{PrivacyPolicy, Redactor};
pub use transparency::CaptureLog;
pub use worker::{CaptureError, CaptureWorker, WorkerKind};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Privacy declaration that can be displayed to users.
pub const PRIVACY_DECLARATION: &str = r#"
╔══════════════════════════════════════════════════════════════════╗
║          OFFLINE CAPTURE AGENT - PRIVACY DECLARATION             ║
╠══════════════════════════════════════════════════════════════════╣
║                                                                  ║
║  This agent records your own work sessions for local review.     ║
║                                                                  ║
║  ✓ WHAT WE CAPTURE (each can be disabled in config):             ║
║    • Interaction events: keyboard, mouse, window, clipboard      ║
║    • Periodic screenshots and a screen video segment             ║
║    • Meeting transcripts when a meeting window is detected       ║
║    • Text recognised from screenshots                            ║
║                                                                  ║
║  ✓ BEFORE ANYTHING IS WRITTEN:                                   ║
║    • Apps and URLs outside your allow-lists are dropped          ║
║    • Email addresses and your custom patterns are redacted       ║
║                                                                  ║
║  ✗ WHAT WE NEVER DO:                                             ║
║    • Upload or transmit anything over the network                ║
║    • Keep data outside the run directory                         ║
║                                                                  ║
║  Every session writes an audit trail to capture.log. Check       ║
║  worker availability anytime with:                               ║
║    capture-agent status                                          ║
║                                                                  ║
╚══════════════════════════════════════════════════════════════════╝
"#;
