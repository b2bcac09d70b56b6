//! Service extensions advertised in an EHLO reply.

use std::collections::BTreeMap;

use crate::client::Reply;

/// Extension keyword (upper case) to its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    entries: BTreeMap<String, String>,
}

impl Extensions {
    /// Parse an EHLO reply. The first line is the server greeting and is
    /// skipped. The obsolete `AUTH=MECH` form is folded into `AUTH`.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut entries = BTreeMap::new();

        for line in reply.lines.iter().skip(1) {
            let (keyword, params) = line.split_once(' ').unwrap_or((line.as_str(), ""));
            let keyword = keyword.to_ascii_uppercase();

            let mechanisms = match keyword.strip_prefix("AUTH=") {
                Some(first) => Some(first),
                None if keyword == "AUTH" => Some(""),
                None => None,
            };

            if let Some(first) = mechanisms {
                let auth: &mut String = entries.entry("AUTH".to_string()).or_default();
                for mechanism in std::iter::once(first).chain(params.split_whitespace()) {
                    merge_mechanism(auth, mechanism);
                }
                continue;
            }

            entries.insert(keyword, params.trim().to_string());
        }

        Self { entries }
    }

    #[must_use]
    pub fn contains(&self, keyword: &str) -> bool {
        self.entries.contains_key(&keyword.to_ascii_uppercase())
    }

    #[must_use]
    pub fn params(&self, keyword: &str) -> Option<&str> {
        self.entries
            .get(&keyword.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// Whether `mechanism` is listed in the AUTH extension.
    #[must_use]
    pub fn supports_auth(&self, mechanism: &str) -> bool {
        self.params("AUTH").is_some_and(|mechanisms| {
            mechanisms
                .split_whitespace()
                .any(|m| m.eq_ignore_ascii_case(mechanism))
        })
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Append `mechanism` to a space separated list unless it is already there.
fn merge_mechanism(auth: &mut String, mechanism: &str) {
    if mechanism.is_empty() || auth.split_whitespace().any(|m| m.eq_ignore_ascii_case(mechanism)) {
        return;
    }
    if !auth.is_empty() {
        auth.push(' ');
    }
    auth.push_str(mechanism);
}
