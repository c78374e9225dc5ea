//! Transparency module for the capture agent.
//!
//! The capture log is the per-run audit trail: controller transitions, the
//! session deadline and every worker outcome land there in plain text.

pub mod log;

pub use log::{format_line, CaptureLog, SharedCaptureLog};
