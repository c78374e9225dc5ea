//! Host capability detection for capture workers.
//!
//! Every worker kind reports an [`Environment`] verdict before the session
//! starts. The supervisor only consumes the verdict; how a probe reaches it
//! (permission flags, binary lookup, platform checks) stays inside the probe.

pub mod permissions;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub use permissions::{probe_accessibility, probe_microphone, probe_screen_recording, ProbeResult};

/// Coarse permission state for a platform capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    #[default]
    Unknown,
    Granted,
    Denied,
    PromptRequired,
    Unavailable,
    /// The host has no permission surface for this capability.
    NotApplicable,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Unknown => "unknown",
            Permission::Granted => "granted",
            Permission::Denied => "denied",
            Permission::PromptRequired => "prompt_required",
            Permission::Unavailable => "unavailable",
            Permission::NotApplicable => "not_applicable",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capability verdict produced by a worker's probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    pub provider: String,
    pub available: bool,
    pub permission: Permission,
    pub message: String,
    pub guidance: Vec<String>,
}

impl Environment {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            available: true,
            permission: Permission::Unknown,
            message: String::new(),
            guidance: Vec::new(),
        }
    }

    /// Apply a permission verdict; `Denied` always makes the worker unavailable.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        if permission == Permission::Denied {
            self.available = false;
        }
        self
    }

    /// Message and guidance joined with `"; "`, skipping blanks.
    pub fn describe(&self) -> String {
        join_message(&self.message, &self.guidance)
    }
}

pub(crate) fn join_message<S: AsRef<str>>(base: &str, extra: &[S]) -> String {
    std::iter::once(base)
        .chain(extra.iter().map(AsRef::as_ref))
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Environment variable resolver.
pub type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Executable resolver, returning the resolved path when found.
pub type PathLookup = Arc<dyn Fn(&str) -> Option<PathBuf> + Send + Sync>;

/// Host facts shared by every probe. Tests swap in fixed lookups.
#[derive(Clone)]
pub struct HostProbe {
    pub os: String,
    pub env: EnvLookup,
    pub path: PathLookup,
}

impl HostProbe {
    /// Probe the real host: process environment and `PATH`.
    pub fn system() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            env: Arc::new(|key| std::env::var(key).ok()),
            path: Arc::new(find_on_path),
        }
    }

    /// A deterministic host for tests.
    pub fn fixed(os: &str, vars: &[(&str, &str)], binaries: &[&str]) -> Self {
        let vars: Vec<(String, String)> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let binaries: Vec<String> = binaries.iter().map(|b| b.to_string()).collect();
        Self {
            os: os.to_string(),
            env: Arc::new(move |key| {
                vars.iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            }),
            path: Arc::new(move |name| {
                binaries
                    .iter()
                    .any(|b| b == name)
                    .then(|| PathBuf::from("/usr/local/bin").join(name))
            }),
        }
    }

    pub fn is_macos(&self) -> bool {
        self.os == "macos"
    }

    pub fn var(&self, key: &str) -> Option<String> {
        (self.env)(key)
    }

    pub fn has_binary(&self, name: &str) -> bool {
        (self.path)(name).is_some()
    }
}

impl fmt::Debug for HostProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostProbe").field("os", &self.os).finish()
    }
}

fn find_on_path(name: &str) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|full| full.is_file())
}
