//! Meeting transcription.
//!
//! A meeting is detected when any configured window title contains a meeting
//! keyword. With a whisper binary on `PATH` the worker writes a redacted
//! WebVTT transcript; without one it leaves installation guidance instead.
//! `status.json` is written in every case.

use super::{ensure_dir, write_json, CaptureContext, CaptureError, CaptureReport, CaptureWorker, WorkerKind};
use crate::environment::{probe_microphone, Environment, HostProbe};
use crate::privacy::Redactor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

const PROVIDER_WHISPER_STUB: &str = "whisper_stub";

const INSTALL_GUIDANCE: &str =
    "Install whisper.cpp locally and place the binary on PATH to enable offline ASR.";

/// Canned segments: (start, end, text).
const SEGMENTS: [(&str, &str, &str); 2] = [
    ("00:00:00.000", "00:00:05.000", "Team sync kicks off with launch checklist."),
    (
        "00:00:05.000",
        "00:00:10.000",
        "Action item: send recap to owner@example.com before EOD.",
    ),
];

#[derive(Debug, Clone)]
pub struct AsrOptions {
    pub meeting_keywords: Vec<String>,
    pub window_titles: Vec<String>,
    pub whisper_binary: String,
    pub language: String,
    pub redactor: Redactor,
}

impl Default for AsrOptions {
    fn default() -> Self {
        Self {
            meeting_keywords: vec!["meeting".into(), "zoom".into(), "teams".into(), "sync".into()],
            window_titles: vec!["Team sync - Zoom Meeting".into()],
            whisper_binary: "whisper".to_string(),
            language: "en".to_string(),
            redactor: Redactor::default(),
        }
    }
}

#[derive(Debug, Serialize)]
struct StatusDocument<'a> {
    generated_at: DateTime<Utc>,
    meeting_detected: bool,
    whisper_available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    transcript: Option<&'a Path>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<&'a Path>,
    language: &'a str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: Vec<String>,
}

pub struct AsrWorker {
    keywords: Vec<String>,
    windows: Vec<String>,
    whisper: String,
    language: String,
    redactor: Redactor,
    host: HostProbe,
}

impl AsrWorker {
    pub fn new(options: AsrOptions, host: HostProbe) -> Result<Self, CaptureError> {
        let keywords: Vec<String> = options
            .meeting_keywords
            .iter()
            .map(|k| k.trim().to_lowercase())
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(CaptureError::invalid(WorkerKind::Asr, "no usable meeting keywords provided"));
        }

        let windows: Vec<String> = options
            .window_titles
            .iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if windows.is_empty() {
            return Err(CaptureError::invalid(WorkerKind::Asr, "no usable window titles provided"));
        }

        let whisper = match options.whisper_binary.trim() {
            "" => "whisper".to_string(),
            name => name.to_string(),
        };
        let language = match options.language.trim() {
            "" => "en".to_string(),
            lang => lang.to_lowercase(),
        };

        Ok(Self {
            keywords,
            windows,
            whisper,
            language,
            redactor: options.redactor,
            host,
        })
    }

    fn meeting_detected(&self) -> bool {
        self.windows.iter().any(|title| {
            let lower = title.to_lowercase();
            self.keywords.iter().any(|kw| lower.contains(kw.as_str()))
        })
    }

    fn render_transcript(&self) -> String {
        let mut out = String::from("WEBVTT\n\n");
        for (i, (start, end, text)) in SEGMENTS.iter().enumerate() {
            let text = self.redactor.apply_str(text);
            let _ = write!(out, "{}\n{start} --> {end}\n{text}\n\n", i + 1);
        }
        out
    }
}

#[async_trait]
impl CaptureWorker for AsrWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Asr
    }

    fn detect_environment(&self) -> Environment {
        let microphone = probe_microphone(&self.host);
        let mut env = Environment::new(PROVIDER_WHISPER_STUB).with_permission(microphone.status);
        env.message = microphone.message;
        env.guidance.extend(microphone.guidance);

        if !self.host.has_binary(&self.whisper) {
            env.message = format!("{}; whisper binary missing", env.message)
                .trim_start_matches("; ")
                .to_string();
            env.guidance
                .push("Install whisper.cpp binary and expose it on PATH".to_string());
        }
        if !env.available {
            env.provider = "stub".to_string();
        }
        env
    }

    async fn capture(&self, ctx: CaptureContext, dest: &Path) -> Result<CaptureReport, CaptureError> {
        let dest = ensure_dir(dest).await?;
        let detected = self.meeting_detected();
        let whisper = self.host.has_binary(&self.whisper);

        let mut transcript: Option<PathBuf> = None;
        let mut guidance: Option<PathBuf> = None;
        let mut notes = Vec::new();
        let mut segments = 0;

        if detected && whisper {
            ctx.checkpoint()?;
            let path = dest.join("meeting_0001.vtt");
            tokio::fs::write(&path, self.render_transcript())
                .await
                .map_err(CaptureError::io("write transcript"))?;
            segments = SEGMENTS.len();
            transcript = Some(path);
        }

        if detected && !whisper {
            let path = dest.join("install_whisper.txt");
            notes.push(format!("whisper binary {:?} not found in PATH", self.whisper));
            tokio::fs::write(&path, format!("{INSTALL_GUIDANCE}\n"))
                .await
                .map_err(CaptureError::io("write guidance"))?;
            guidance = Some(path);
        }

        let status_path = dest.join("status.json");
        let status = StatusDocument {
            generated_at: (ctx.clock)(),
            meeting_detected: detected,
            whisper_available: whisper,
            transcript: transcript.as_deref(),
            guidance: guidance.as_deref(),
            language: &self.language,
            notes,
        };
        write_json(&status_path, &status, "asr status").await?;

        let message = match (&transcript, detected) {
            (Some(path), _) => format!("transcript -> {}", path.display()),
            (None, true) => "meeting detected (no transcript)".to_string(),
            (None, false) => "no meeting detected".to_string(),
        };
        let mut files = vec![status_path.clone()];
        files.extend(transcript.iter().cloned());
        files.extend(guidance.iter().cloned());

        Ok(CaptureReport {
            message,
            log_line: format!("meeting={detected} whisper={whisper} segments={segments}"),
            files,
            items: segments,
            details: json!({
                "meeting_detected": detected,
                "whisper_available": whisper,
                "transcript_path": transcript,
                "guidance_path": guidance,
                "status_path": status_path,
                "segment_count": segments,
            }),
        })
    }
}
