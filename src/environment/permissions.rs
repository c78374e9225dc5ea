//! Permission probes backed by environment overrides.
//!
//! `LIMITLESS_ACCESSIBILITY`, `LIMITLESS_SCREEN_RECORDING` and
//! `LIMITLESS_MICROPHONE` pre-set a verdict so sessions can be rehearsed
//! without touching OS dialogs.

use super::{HostProbe, Permission};

pub const ACCESSIBILITY_VAR: &str = "LIMITLESS_ACCESSIBILITY";
pub const SCREEN_RECORDING_VAR: &str = "LIMITLESS_SCREEN_RECORDING";
pub const MICROPHONE_VAR: &str = "LIMITLESS_MICROPHONE";

/// Result of probing one permission surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub status: Permission,
    pub message: String,
    pub guidance: Option<String>,
}

impl ProbeResult {
    fn new(status: Permission, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            guidance: None,
        }
    }
}

pub fn probe_screen_recording(host: &HostProbe) -> ProbeResult {
    probe(
        host,
        SCREEN_RECORDING_VAR,
        "screen recording",
        "awaiting macOS screen recording authorisation",
        "screen recording unsupported on this platform",
    )
}

pub fn probe_accessibility(host: &HostProbe) -> ProbeResult {
    probe(
        host,
        ACCESSIBILITY_VAR,
        "accessibility",
        "accessibility trust required",
        "accessibility prompts unavailable",
    )
}

pub fn probe_microphone(host: &HostProbe) -> ProbeResult {
    probe(
        host,
        MICROPHONE_VAR,
        "microphone",
        "microphone access will prompt at runtime",
        "microphone capture unsupported",
    )
}

fn probe(
    host: &HostProbe,
    var: &str,
    name: &str,
    macos_message: &str,
    unsupported_message: &str,
) -> ProbeResult {
    if let Some(value) = host.var(var) {
        return interpret_flag(name, &value);
    }
    if host.is_macos() {
        ProbeResult::new(Permission::PromptRequired, macos_message)
    } else {
        ProbeResult::new(Permission::Unavailable, unsupported_message)
    }
}

fn interpret_flag(name: &str, value: &str) -> ProbeResult {
    match value.trim().to_lowercase().as_str() {
        "granted" | "allow" | "allowed" | "yes" | "true" => ProbeResult::new(
            Permission::Granted,
            format!("{name} permission pre-authorised via env override"),
        ),
        "denied" | "no" | "false" | "blocked" => ProbeResult {
            status: Permission::Denied,
            message: format!("{name} permission denied via env override"),
            guidance: Some("use 'tccutil reset' or update LIMITLESS_* env to re-test".to_string()),
        },
        "prompt" | "ask" => ProbeResult::new(
            Permission::PromptRequired,
            format!("{name} permission will prompt at runtime"),
        ),
        "unavailable" | "unsupported" => ProbeResult::new(
            Permission::Unavailable,
            format!("{name} permission unavailable on this platform"),
        ),
        _ => ProbeResult::new(
            Permission::Unknown,
            format!("{name} permission state unknown"),
        ),
    }
}
