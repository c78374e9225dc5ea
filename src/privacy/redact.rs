//! Pattern-based redaction applied to free text and event metadata.
//!
//! Patterns run in configured order, so a later pattern may act on text an
//! earlier one already rewrote.

use regex::Regex;
use std::collections::HashMap;
use thiserror::Error;

/// Token written in place of every match.
pub const PLACEHOLDER: &str = "[REDACTED]";

const EMAIL_PATTERN: &str = r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}";
const CC16_PATTERN: &str = r"\b(?:\d[ -]?){16}\b";
const JWT_PATTERN: &str = r"eyJ[A-Za-z0-9_-]*\.[A-Za-z0-9._-]+\.[A-Za-z0-9._-]+";

/// Expand a well-known short name into its built-in expression.
fn builtin(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "email" => Some(EMAIL_PATTERN),
        "cc16" => Some(CC16_PATTERN),
        "jwt" => Some(JWT_PATTERN),
        _ => None,
    }
}

/// Errors raised while building a redactor.
#[derive(Debug, Error)]
pub enum RedactError {
    #[error("invalid redaction pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Ordered list of substitutions. The default value redacts nothing.
#[derive(Debug, Clone, Default)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Build a redactor from the email toggle and custom expressions.
    ///
    /// `email`, `cc16` and `jwt` (any case) expand to built-in expressions;
    /// blank entries are ignored.
    pub fn new<S: AsRef<str>>(redact_emails: bool, custom: &[S]) -> Result<Self, RedactError> {
        let mut patterns = Vec::with_capacity(custom.len() + 1);

        if redact_emails {
            patterns.push(compile(EMAIL_PATTERN)?);
        }

        for expr in custom {
            let trimmed = expr.as_ref().trim();
            if trimmed.is_empty() {
                continue;
            }
            let candidate = builtin(trimmed).unwrap_or(trimmed);
            patterns.push(compile(candidate)?);
        }

        Ok(Self { patterns })
    }

    /// Number of active patterns.
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Replace every match of every pattern with [`PLACEHOLDER`].
    pub fn apply_str(&self, input: &str) -> String {
        let mut redacted = input.to_string();
        for rx in &self.patterns {
            // `replace_all` borrows on no-match; only reallocate on hits.
            if rx.is_match(&redacted) {
                redacted = rx.replace_all(&redacted, PLACEHOLDER).into_owned();
            }
        }
        redacted
    }

    /// Return a new map with every value redacted. The input is untouched.
    pub fn apply_metadata(&self, input: &HashMap<String, String>) -> HashMap<String, String> {
        input
            .iter()
            .map(|(k, v)| (k.clone(), self.apply_str(v)))
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex, RedactError> {
    Regex::new(pattern).map_err(|source| RedactError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}
