//! Allow-list filtering for capture records.

use std::collections::{HashMap, HashSet};

/// Anything the policy can judge: it only needs the app and URL attributes.
pub trait PrivacySubject {
    fn app(&self) -> Option<&str>;
    fn url(&self) -> Option<&str>;
}

impl PrivacySubject for HashMap<String, String> {
    fn app(&self) -> Option<&str> {
        self.get("app").map(String::as_str)
    }

    fn url(&self) -> Option<&str> {
        self.get("url").map(String::as_str)
    }
}

/// Allow-list policy over apps and URL prefixes.
///
/// The default value allows everything.
#[derive(Debug, Clone, Default)]
pub struct PrivacyPolicy {
    allow_apps: HashSet<String>,
    allow_urls: Vec<String>,
    drop_unknown: bool,
}

impl PrivacyPolicy {
    pub fn new<S: AsRef<str>>(allow_apps: &[S], allow_urls: &[S], drop_unknown: bool) -> Self {
        let allow_apps = allow_apps
            .iter()
            .map(|app| app.as_ref().trim().to_lowercase())
            .filter(|app| !app.is_empty())
            .collect();
        let allow_urls = allow_urls
            .iter()
            .map(|url| url.as_ref().trim().to_lowercase())
            .filter(|url| !url.is_empty())
            .collect();

        Self {
            allow_apps,
            allow_urls,
            drop_unknown,
        }
    }

    /// True when no allow-list is configured.
    pub fn is_permissive(&self) -> bool {
        self.allow_apps.is_empty() && self.allow_urls.is_empty()
    }

    /// Whether a record passes every configured dimension.
    pub fn allows<R: PrivacySubject + ?Sized>(&self, record: &R) -> bool {
        if self.is_permissive() {
            return true;
        }

        if !self.allow_apps.is_empty() {
            let allowed = match normalized(record.app()) {
                None => !self.drop_unknown,
                Some(app) => self.allow_apps.contains(&app),
            };
            if !allowed {
                return false;
            }
        }

        if !self.allow_urls.is_empty() {
            let allowed = match normalized(record.url()) {
                None => !self.drop_unknown,
                Some(url) => self
                    .allow_urls
                    .iter()
                    .any(|prefix| url.starts_with(prefix.as_str())),
            };
            if !allowed {
                return false;
            }
        }

        true
    }
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_empty_policy_allows_everything() {
        let policy = PrivacyPolicy::default();
        assert!(policy.allows(&record(&[])));
        assert!(policy.allows(&record(&[("app", "anything")])));
    }

    #[test]
    fn test_app_match_is_exact_and_case_insensitive() {
        let policy = PrivacyPolicy::new(&[" Docs "], &[], false);
        assert!(policy.allows(&record(&[("app", "DOCS")])));
        assert!(!policy.allows(&record(&[("app", "docs-preview")])));
        assert!(!policy.allows(&record(&[("app", "mail")])));
    }

    #[test]
    fn test_drop_unknown_rejects_missing_app() {
        let strict = PrivacyPolicy::new(&["docs"], &[], true);
        assert!(!strict.allows(&record(&[])));

        let lenient = PrivacyPolicy::new(&["docs"], &[], false);
        assert!(lenient.allows(&record(&[])));
    }

    #[test]
    fn test_url_prefix_match() {
        let policy = PrivacyPolicy::new(&[], &["https://Docs.example.com/"], false);
        assert!(policy.allows(&record(&[("url", "https://docs.example.com/roadmap")])));
        assert!(!policy.allows(&record(&[("url", "https://mail.example.com/")])));
        assert!(policy.allows(&record(&[("app", "mail")])));
    }

    #[test]
    fn test_every_dimension_must_allow() {
        let policy = PrivacyPolicy::new(&["docs"], &["https://docs.example.com"], true);
        assert!(policy.allows(&record(&[
            ("app", "docs"),
            ("url", "https://docs.example.com/a")
        ])));
        assert!(!policy.allows(&record(&[
            ("app", "docs"),
            ("url", "https://evil.example.com/a")
        ])));
        assert!(!policy.allows(&record(&[("app", "docs")])));
    }
}
