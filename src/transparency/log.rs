//! Append-only capture log.
//!
//! Every notable session event is written as one line,
//! `[<RFC3339 UTC>] subsystem=<name> <message>`, and flushed immediately so a
//! crash mid-session still leaves a readable partial log.

use chrono::{DateTime, SecondsFormat, Utc};
use std::fmt::Display;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Capture log for one run directory.
#[derive(Debug)]
pub struct CaptureLog {
    file: Mutex<File>,
    path: PathBuf,
    /// Number of lines written this session
    lines_written: AtomicU64,
}

impl CaptureLog {
    /// Open `path` for appending, creating it when missing.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            file: Mutex::new(file),
            path,
            lines_written: AtomicU64::new(0),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line. Write failures are reported through tracing and
    /// otherwise ignored; the log never aborts a session.
    pub fn write(&self, timestamp: DateTime<Utc>, subsystem: &str, message: impl Display) {
        let line = format_line(timestamp, subsystem, message);
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let result = file
            .write_all(line.as_bytes())
            .and_then(|_| file.flush());
        match result {
            Ok(()) => {
                self.lines_written.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!(path = %self.path.display(), error = %e, "capture log write failed"),
        }
    }

    pub fn lines_written(&self) -> u64 {
        self.lines_written.load(Ordering::Relaxed)
    }
}

/// Format a single capture log line, including the trailing newline.
pub fn format_line(timestamp: DateTime<Utc>, subsystem: &str, message: impl Display) -> String {
    format!(
        "[{}] subsystem={} {}\n",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        subsystem,
        message
    )
}

/// Thread-safe shared capture log.
pub type SharedCaptureLog = Arc<CaptureLog>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_line_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();
        let line = format_line(ts, "controller", "state=running reason=initial");
        assert_eq!(
            line,
            "[2024-03-09T14:05:00Z] subsystem=controller state=running reason=initial\n"
        );
    }

    #[test]
    fn test_lines_are_appended_and_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("capture.log");
        let ts = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 0).unwrap();

        {
            let log = CaptureLog::open(&path).unwrap();
            log.write(ts, "events", "captured 4 fine events");
            // Visible before the log is dropped.
            let content = std::fs::read_to_string(&path).unwrap();
            assert_eq!(content.lines().count(), 1);
            assert_eq!(log.lines_written(), 1);
        }

        let log = CaptureLog::open(&path).unwrap();
        log.write(ts, "ocr", format_args!("processed={} skipped={}", 2, 0));
        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].ends_with("subsystem=ocr processed=2 skipped=0"));
    }

    #[test]
    fn test_concurrent_writers_produce_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let log = Arc::new(CaptureLog::open(dir.path().join("capture.log")).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || {
                    for j in 0..25 {
                        log.write(Utc::now(), "worker", format!("thread={i} line={j}"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let content = std::fs::read_to_string(log.path()).unwrap();
        assert_eq!(content.lines().count(), 100);
        assert!(content.lines().all(|l| l.contains("subsystem=worker thread=")));
    }
}
