//! Run directory layout and the run manifest.
//!
//! ```text
//! runs/<run_id>/
//!   manifest.json   capture.log
//!   events/  screenshots/  video/  asr/  ocr/  bundles/  report/
//! ```

use crate::config::Config;
use crate::core::{StateChange, Summary, TerminationCause, WorkerOutcome};
use crate::worker::WorkerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use uuid::Uuid;

pub const SCHEMA_VERSION: u32 = 1;

const MANIFEST_FILE: &str = "manifest.json";
const CAPTURE_LOG_FILE: &str = "capture.log";
const BUNDLES_DIR: &str = "bundles";
const REPORT_DIR: &str = "report";

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("runs directory must not be empty")]
    EmptyRunsDir,

    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("encode manifest: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("decode manifest {}: {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn io_error(context: &'static str, path: &Path) -> impl FnOnce(io::Error) -> ManifestError {
    let path = path.to_path_buf();
    move |source| ManifestError::Io { context, path, source }
}

/// Absolute locations inside one run directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub capture_log: PathBuf,
    pub bundles: PathBuf,
    pub report: PathBuf,
}

impl Layout {
    pub fn new(runs_dir: &Path, run_id: &str) -> Self {
        let root = runs_dir.join(run_id);
        Self {
            manifest: root.join(MANIFEST_FILE),
            capture_log: root.join(CAPTURE_LOG_FILE),
            bundles: root.join(BUNDLES_DIR),
            report: root.join(REPORT_DIR),
            root,
        }
    }

    /// Output directory of a worker kind.
    pub fn worker_dir(&self, kind: WorkerKind) -> PathBuf {
        self.root.join(kind.name())
    }

    /// Create the directory tree and an empty capture log.
    pub fn ensure(&self) -> Result<(), ManifestError> {
        std::fs::create_dir_all(&self.root).map_err(io_error("create run root", &self.root))?;

        let dirs = WorkerKind::ALL
            .iter()
            .map(|kind| self.worker_dir(*kind))
            .chain([self.bundles.clone(), self.report.clone()]);
        for dir in dirs {
            std::fs::create_dir_all(&dir).map_err(io_error("create directory", &dir))?;
        }

        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.capture_log)
            .map_err(io_error("initialise capture log", &self.capture_log))?;
        Ok(())
    }

    pub fn relative_paths(&self) -> RelativePaths {
        let name = |kind: WorkerKind| kind.name().to_string();
        RelativePaths {
            root: ".".to_string(),
            manifest: MANIFEST_FILE.to_string(),
            capture_log: CAPTURE_LOG_FILE.to_string(),
            video: name(WorkerKind::Video),
            events: name(WorkerKind::Events),
            screenshots: name(WorkerKind::Screenshots),
            asr: name(WorkerKind::Asr),
            ocr: name(WorkerKind::Ocr),
            bundles: BUNDLES_DIR.to_string(),
            report: REPORT_DIR.to_string(),
        }
    }
}

/// Pick a run id of the form `YYYYMMDD_HHMMSS`, suffixed `_01`, `_02`... when
/// a directory with that name already exists.
pub fn resolve_run_id(runs_dir: &Path, now: DateTime<Utc>) -> Result<String, ManifestError> {
    if runs_dir.as_os_str().is_empty() {
        return Err(ManifestError::EmptyRunsDir);
    }

    let base = now.format("%Y%m%d_%H%M%S").to_string();
    let mut candidate = base.clone();
    let mut suffix = 1;
    loop {
        let path = runs_dir.join(&candidate);
        match std::fs::symlink_metadata(&path) {
            Ok(_) => {
                candidate = format!("{base}_{suffix:02}");
                suffix += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(candidate),
            Err(e) => return Err(io_error("inspect runs directory", &path)(e)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativePaths {
    pub root: String,
    pub manifest: String,
    pub capture_log: String,
    pub video: String,
    pub events: String,
    pub screenshots: String,
    pub asr: String,
    pub ocr: String,
    pub bundles: String,
    pub report: String,
}

/// Capture settings recorded for the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureSettings {
    pub duration_minutes: u64,
    pub video_enabled: bool,
    pub screenshots_enabled: bool,
    pub events_enabled: bool,
    pub asr_enabled: bool,
    pub ocr_enabled: bool,
}

impl From<&Config> for CaptureSettings {
    fn from(config: &Config) -> Self {
        let capture = &config.capture;
        Self {
            duration_minutes: capture.duration_minutes,
            video_enabled: capture.video.enabled,
            screenshots_enabled: capture.screenshots.enabled,
            events_enabled: capture.events.enabled,
            asr_enabled: capture.asr.enabled,
            ocr_enabled: capture.ocr.enabled,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    pub state: RunStatus,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationCause>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub controller_timeline: Vec<StateChange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subsystems: Vec<WorkerOutcome>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub schema_version: u32,
    pub run_id: String,
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub hostname: String,
    pub app_version: String,
    pub config_source: String,
    pub capture: CaptureSettings,
    pub paths: RelativePaths,
    pub status: Status,
}

impl Manifest {
    pub fn new(
        run_id: &str,
        created_at: DateTime<Utc>,
        config: &Config,
        config_source: &str,
        layout: &Layout,
    ) -> Self {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());
        Self {
            schema_version: SCHEMA_VERSION,
            run_id: run_id.to_string(),
            session_id: Uuid::new_v4(),
            created_at,
            hostname,
            app_version: crate::VERSION.to_string(),
            config_source: config_source.to_string(),
            capture: CaptureSettings::from(config),
            paths: layout.relative_paths(),
            status: Status::default(),
        }
    }

    pub fn mark_running(&mut self) {
        self.status.state = RunStatus::Running;
        self.status.summary = "capture in progress".to_string();
    }

    /// Fold a finished session into the status block.
    pub fn record_summary(&mut self, summary: &Summary, error: Option<&str>) {
        let lifecycle = &summary.lifecycle;
        self.status.started_at = Some(lifecycle.started_at);
        self.status.ended_at = lifecycle.finished_at;
        self.status.termination = lifecycle.termination_cause;
        self.status.controller_timeline = lifecycle.controller_timeline.clone();
        self.status.subsystems = summary.outcomes.clone();

        match error {
            Some(err) => {
                self.status.state = RunStatus::Failed;
                self.status.summary = err.to_string();
                self.status.termination.get_or_insert(TerminationCause::Error);
            }
            None => {
                self.status.state = RunStatus::Completed;
                let termination = *self.status.termination.get_or_insert(TerminationCause::Completed);
                self.status.summary = format!("capture finished ({})", termination.as_str());
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let data = serde_json::to_vec_pretty(self).map_err(ManifestError::Encode)?;
        std::fs::write(path, data).map_err(io_error("write manifest", path))
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let data = std::fs::read(path).map_err(io_error("read manifest", path))?;
        serde_json::from_slice(&data).map_err(|source| ManifestError::Decode {
            path: path.to_path_buf(),
            source,
        })
    }
}
