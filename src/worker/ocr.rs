//! Screenshot text recognition.
//!
//! Runs over the screenshot files handed in through the capture context.
//! Inputs that cannot be read are counted as skipped; recognised text is
//! redacted before it is indexed.

use super::screenshots::FrameMetadata;
use super::{ensure_dir, write_json, CaptureContext, CaptureError, CaptureReport, CaptureWorker, WorkerKind};
use crate::environment::{Environment, HostProbe};
use crate::privacy::Redactor;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};

const PROVIDER_TESSERACT_STUB: &str = "tesseract_stub";

#[derive(Debug, Clone)]
pub struct OcrOptions {
    pub languages: Vec<String>,
    pub tesseract_binary: String,
    pub redactor: Redactor,
}

impl Default for OcrOptions {
    fn default() -> Self {
        Self {
            languages: vec!["eng".to_string()],
            tesseract_binary: "tesseract".to_string(),
            redactor: Redactor::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub screenshot: String,
    pub text: String,
    pub language: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OcrIndex {
    pub generated_at: DateTime<Utc>,
    pub entries: Vec<IndexEntry>,
}

#[derive(Debug, Serialize)]
struct OcrStatus<'a> {
    generated_at: DateTime<Utc>,
    processed: usize,
    skipped: usize,
    languages: &'a [String],
    index: Option<&'a Path>,
    tesseract_available: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    notes: Vec<String>,
}

pub struct OcrWorker {
    languages: Vec<String>,
    binary: String,
    redactor: Redactor,
    host: HostProbe,
}

impl OcrWorker {
    pub fn new(options: OcrOptions, host: HostProbe) -> Result<Self, CaptureError> {
        if options.languages.is_empty() {
            return Err(CaptureError::invalid(WorkerKind::Ocr, "languages must not be empty"));
        }
        let languages: Vec<String> = options
            .languages
            .iter()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect();
        if languages.is_empty() {
            return Err(CaptureError::invalid(WorkerKind::Ocr, "no usable languages provided"));
        }
        let binary = match options.tesseract_binary.trim() {
            "" => "tesseract".to_string(),
            name => name.to_string(),
        };
        Ok(Self {
            languages,
            binary,
            redactor: options.redactor,
            host,
        })
    }

    /// Text for one screenshot.
    ///
    /// The synthetic backend records the focused window in the frame's
    /// sidecar notes; anything else falls back to the printable content of
    /// the file itself.
    async fn recognise(&self, shot: &Path) -> std::io::Result<String> {
        let data = tokio::fs::read(shot).await?;
        if let Ok(raw) = tokio::fs::read(FrameMetadata::sidecar(shot)).await {
            if let Ok(meta) = serde_json::from_slice::<FrameMetadata>(&raw) {
                if !meta.notes.is_empty() {
                    return Ok(meta.notes.join("\n"));
                }
            }
        }
        let text: String = String::from_utf8_lossy(&data)
            .chars()
            .filter(|c| !c.is_control() || c.is_whitespace())
            .filter(|c| *c != char::REPLACEMENT_CHARACTER)
            .collect();
        Ok(text.trim().to_string())
    }
}

#[async_trait]
impl CaptureWorker for OcrWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Ocr
    }

    fn detect_environment(&self) -> Environment {
        let mut env = Environment::new(PROVIDER_TESSERACT_STUB);
        if self.host.has_binary(&self.binary) {
            env.message = "tesseract binary detected".to_string();
        } else {
            env.message = "tesseract binary missing".to_string();
            env.guidance
                .push("Install Tesseract OCR and expose it on PATH".to_string());
        }
        env
    }

    async fn capture(&self, ctx: CaptureContext, dest: &Path) -> Result<CaptureReport, CaptureError> {
        let dest = ensure_dir(dest).await?;
        let available = self.host.has_binary(&self.binary);
        let mut entries = Vec::with_capacity(ctx.inputs.len());
        let mut skipped = 0;

        for shot in &ctx.inputs {
            ctx.checkpoint()?;
            let Ok(text) = self.recognise(shot).await else {
                skipped += 1;
                continue;
            };
            entries.push(IndexEntry {
                screenshot: file_name(shot),
                text: self.redactor.apply_str(&text),
                language: self.languages[0].clone(),
            });
        }
        let processed = entries.len();

        let index_path: Option<PathBuf> = if entries.is_empty() {
            None
        } else {
            let path = dest.join("index.json");
            let index = OcrIndex {
                generated_at: (ctx.clock)(),
                entries,
            };
            write_json(&path, &index, "ocr index").await?;
            Some(path)
        };

        let mut notes = Vec::new();
        if !available {
            notes.push(format!("tesseract binary {:?} not detected", self.binary));
        }
        let status_path = dest.join("status.json");
        let status = OcrStatus {
            generated_at: (ctx.clock)(),
            processed,
            skipped,
            languages: &self.languages,
            index: index_path.as_deref(),
            tesseract_available: available,
            notes,
        };
        write_json(&status_path, &status, "ocr status").await?;

        let summary = format!("processed={processed} skipped={skipped}");
        let mut files = vec![status_path.clone()];
        files.extend(index_path.iter().cloned());
        Ok(CaptureReport {
            message: summary.clone(),
            log_line: summary,
            files,
            items: processed,
            details: json!({
                "processed_count": processed,
                "skipped_count": skipped,
                "index_path": index_path,
                "status_path": status_path,
                "tesseract_available": available,
            }),
        })
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::system_clock;
    use crate::privacy::PLACEHOLDER;
    use tokio_util::sync::CancellationToken;

    fn ctx(inputs: Vec<PathBuf>) -> CaptureContext {
        CaptureContext::new(CancellationToken::new(), system_clock()).with_inputs(inputs)
    }

    fn worker(binaries: &[&str]) -> OcrWorker {
        let options = OcrOptions {
            redactor: Redactor::new(true, &[] as &[&str]).unwrap(),
            ..OcrOptions::default()
        };
        OcrWorker::new(options, HostProbe::fixed("linux", &[], binaries)).unwrap()
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_slice(&std::fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_rejects_blank_languages() {
        let options = OcrOptions {
            languages: vec!["".to_string()],
            ..OcrOptions::default()
        };
        assert!(OcrWorker::new(options, HostProbe::fixed("linux", &[], &[])).is_err());
    }

    #[tokio::test]
    async fn test_indexes_readable_inputs_and_skips_missing() {
        let dir = tempfile::tempdir().unwrap();
        let shots = dir.path().join("shots");
        std::fs::create_dir_all(&shots).unwrap();
        let readable = shots.join("screenshot_001.png");
        std::fs::write(&readable, "Reply to owner@example.com").unwrap();
        let missing = shots.join("screenshot_002.png");

        let out = dir.path().join("ocr");
        let report = worker(&["tesseract"])
            .capture(ctx(vec![readable, missing]), &out)
            .await
            .unwrap();
        assert_eq!(report.message, "processed=1 skipped=1");

        let index: OcrIndex = serde_json::from_value(read_json(&out.join("index.json"))).unwrap();
        assert_eq!(index.entries.len(), 1);
        assert_eq!(index.entries[0].screenshot, "screenshot_001.png");
        assert_eq!(index.entries[0].text, format!("Reply to {PLACEHOLDER}"));
        assert_eq!(index.entries[0].language, "eng");

        let status = read_json(&out.join("status.json"));
        assert_eq!(status["tesseract_available"], true);
        assert!(status.get("notes").is_none());
    }

    #[tokio::test]
    async fn test_sidecar_notes_are_recognised() {
        let dir = tempfile::tempdir().unwrap();
        let image = dir.path().join("screenshot_001.png");
        std::fs::write(&image, [0x89u8, 0x50, 0x4E, 0x47]).unwrap();
        let meta = FrameMetadata {
            captured_at: Utc::now(),
            backend: "synthetic".to_string(),
            width: 1,
            height: 1,
            pixel_format: String::new(),
            scale: 1.0,
            image_path: "screenshot_001.png".to_string(),
            notes: vec!["window: Inbox - mail from support@example.com".to_string()],
        };
        std::fs::write(FrameMetadata::sidecar(&image), serde_json::to_vec(&meta).unwrap()).unwrap();

        let out = dir.path().join("ocr");
        worker(&[]).capture(ctx(vec![image]), &out).await.unwrap();
        let index: OcrIndex = serde_json::from_value(read_json(&out.join("index.json"))).unwrap();
        assert_eq!(index.entries[0].text, format!("window: Inbox - mail from {PLACEHOLDER}"));
    }

    #[tokio::test]
    async fn test_empty_input_set_writes_status_only() {
        let dir = tempfile::tempdir().unwrap();
        let report = worker(&[]).capture(ctx(Vec::new()), dir.path()).await.unwrap();

        assert_eq!(report.items, 0);
        assert!(!dir.path().join("index.json").exists());
        let status = read_json(&dir.path().join("status.json"));
        assert_eq!(status["processed"], 0);
        assert!(status["index"].is_null());
        assert_eq!(status["tesseract_available"], false);
    }

    #[test]
    fn test_probe_is_always_available() {
        let env = worker(&[]).detect_environment();
        assert!(env.available);
        assert_eq!(env.message, "tesseract binary missing");
        assert_eq!(env.describe(), "tesseract binary missing; Install Tesseract OCR and expose it on PATH");

        let env = worker(&["tesseract"]).detect_environment();
        assert_eq!(env.message, "tesseract binary detected");
    }
}
