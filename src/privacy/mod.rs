//! Privacy pipeline shared by every capture worker.
//!
//! Records are first checked against the [`PrivacyPolicy`] allow-lists and
//! then passed through the [`Redactor`] before anything reaches disk.

pub mod policy;
pub mod redact;

pub use policy::{PrivacyPolicy, PrivacySubject};
pub use redact::{RedactError, Redactor, PLACEHOLDER};
