//! Configuration for the capture agent.

use crate::logging::{normalize_level, LogFormat};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Main configuration for the capture agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub paths: PathsConfig,
    pub capture: CaptureConfig,
    pub logging: LoggingConfig,

    /// Whether a live session should be paused
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            capture: CaptureConfig::default(),
            logging: LoggingConfig::default(),
            paused: false,
        }
    }
}

/// Filesystem locations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Parent directory of every run directory
    pub runs_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            runs_dir: PathBuf::from("runs"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Session length limit; 0 runs until stopped
    pub duration_minutes: u64,
    pub events: EventsConfig,
    pub screenshots: ScreenshotsConfig,
    pub video: VideoConfig,
    pub asr: AsrConfig,
    pub ocr: OcrConfig,
    pub privacy: PrivacyConfig,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            duration_minutes: 0,
            events: EventsConfig::default(),
            screenshots: ScreenshotsConfig::default(),
            video: VideoConfig::default(),
            asr: AsrConfig::default(),
            ocr: OcrConfig::default(),
            privacy: PrivacyConfig::default(),
        }
    }
}

impl CaptureConfig {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    pub enabled: bool,
    #[serde(rename = "fine_interval_secs", with = "duration_serde")]
    pub fine_interval: Duration,
    #[serde(rename = "coarse_interval_secs", with = "duration_serde")]
    pub coarse_interval: Duration,
    pub redact_emails: bool,
    /// Extra expressions; `email`, `cc16` and `jwt` name built-ins
    pub redact_patterns: Vec<String>,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fine_interval: Duration::from_secs(10),
            coarse_interval: Duration::from_secs(60),
            redact_emails: true,
            redact_patterns: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenshotsConfig {
    pub enabled: bool,
    #[serde(rename = "interval_secs", with = "duration_serde")]
    pub interval: Duration,
    pub max_per_minute: u32,
}

impl Default for ScreenshotsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(60),
            max_per_minute: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub enabled: bool,
    #[serde(rename = "chunk_secs", with = "duration_serde")]
    pub chunk: Duration,
    pub format: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            chunk: Duration::from_secs(300),
            format: "webm".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsrConfig {
    pub enabled: bool,
    pub meeting_keywords: Vec<String>,
    /// Window titles inspected for meeting keywords
    pub window_titles: Vec<String>,
    pub whisper_binary: String,
    pub language: String,
}

impl Default for AsrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            meeting_keywords: ["meeting", "zoom", "teams", "sync"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            window_titles: vec!["Team sync - Zoom Meeting".to_string()],
            whisper_binary: "whisper".to_string(),
            language: "en".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    pub languages: Vec<String>,
    pub tesseract_binary: String,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            languages: vec!["eng".to_string()],
            tesseract_binary: "tesseract".to_string(),
        }
    }
}

/// Allow-lists applied to captured records. Empty lists allow everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub allow_apps: Vec<String>,
    /// URL prefixes
    pub allow_urls: Vec<String>,
    /// Drop records that lack the attribute an allow-list checks
    pub drop_unknown: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `text`, `console` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load an explicit file. A missing file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Config = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.normalize();
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content).map_err(io)
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("offline-capture-agent")
            .join("config.json")
    }

    /// Fill blank values with defaults.
    pub fn normalize(&mut self) {
        let defaults = Config::default();

        if self.paths.runs_dir.as_os_str().is_empty() || self.paths.runs_dir == Path::new(".") {
            self.paths.runs_dir = defaults.paths.runs_dir;
        }
        if self.logging.level.trim().is_empty() {
            self.logging.level = defaults.logging.level;
        }
        if self.logging.format.trim().is_empty() {
            self.logging.format = defaults.logging.format;
        }
        self.logging.level = self.logging.level.trim().to_lowercase();
        self.logging.format = self.logging.format.trim().to_lowercase();

        if self.capture.video.format.trim().is_empty() {
            self.capture.video.format = defaults.capture.video.format;
        }
        self.capture.video.format = self.capture.video.format.trim().to_lowercase();
        if self.capture.asr.whisper_binary.trim().is_empty() {
            self.capture.asr.whisper_binary = defaults.capture.asr.whisper_binary;
        }
        if self.capture.asr.language.trim().is_empty() {
            self.capture.asr.language = defaults.capture.asr.language;
        }
        if self.capture.ocr.tesseract_binary.trim().is_empty() {
            self.capture.ocr.tesseract_binary = defaults.capture.ocr.tesseract_binary;
        }
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.paths.runs_dir.as_os_str().is_empty() {
            return invalid("paths.runs_dir must not be empty");
        }
        normalize_level(&self.logging.level)
            .map_err(|e| ConfigError::Invalid(format!("logging.level: {e}")))?;
        LogFormat::from_str(&self.logging.format)
            .map_err(|e| ConfigError::Invalid(format!("logging.format: {e}")))?;

        let capture = &self.capture;
        if capture.video.chunk.is_zero() {
            return invalid("capture.video.chunk_secs must be positive");
        }
        if capture.video.format.trim().is_empty() {
            return invalid("capture.video.format must not be empty");
        }
        if capture.screenshots.interval.is_zero() {
            return invalid("capture.screenshots.interval_secs must be positive");
        }
        if capture.screenshots.max_per_minute == 0 {
            return invalid("capture.screenshots.max_per_minute must be positive");
        }
        if capture.events.fine_interval.is_zero() {
            return invalid("capture.events.fine_interval_secs must be positive");
        }
        if capture.events.coarse_interval.is_zero() {
            return invalid("capture.events.coarse_interval_secs must be positive");
        }
        if capture.events.coarse_interval < capture.events.fine_interval {
            return invalid("capture.events.coarse_interval_secs must not be below fine_interval_secs");
        }
        Ok(())
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file {} not found", .0.display())]
    NotFound(PathBuf),

    #[error("config file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialize config: {0}")]
    Serialize(#[source] serde_json::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Serde support for Duration as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.paths.runs_dir, PathBuf::from("runs"));
        assert_eq!(config.capture.events.fine_interval, Duration::from_secs(10));
        assert_eq!(config.capture.screenshots.max_per_minute, 3);
        assert_eq!(config.capture.video.format, "webm");
        assert_eq!(config.capture.duration(), Duration::ZERO);
        assert!(!config.paused);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_durations_serialize_as_seconds() {
        let json = serde_json::to_value(Config::default()).unwrap();
        assert_eq!(json["capture"]["events"]["fine_interval_secs"], 10);
        assert_eq!(json["capture"]["video"]["chunk_secs"], 300);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"capture": {"duration_minutes": 5, "video": {"enabled": false, "format": " MP4 "}}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.capture.duration(), Duration::from_secs(300));
        assert!(!config.capture.video.enabled);
        assert_eq!(config.capture.video.format, "mp4");
        assert_eq!(config.capture.video.chunk, Duration::from_secs(300));
        assert!(config.capture.events.enabled);
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_validation_rejects_inverted_intervals() {
        let mut config = Config::default();
        config.capture.events.coarse_interval = Duration::from_secs(5);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_round_trips_paused_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            paused: true,
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert!(Config::load_from(&path).unwrap().paused);
    }
}
