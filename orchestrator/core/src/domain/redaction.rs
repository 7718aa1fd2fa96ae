// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! PII redaction for audit payloads.
//!
//! Matching string leaves are replaced wholesale with a fixed marker. No
//! prefix, suffix or hash of the original value survives.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub const DEFAULT_REDACTION_MARKER: &str = "[REDACTED]";

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[a-z0-9._%+\-]+@[a-z0-9.\-]+\.[a-z]{2,}").expect("static email regex")
});

/// Decides whether a string leaf is sensitive.
pub trait PiiPredicate: Send + Sync {
    fn is_sensitive(&self, key: Option<&str>, value: &str) -> bool;
}

/// Matches email-shaped strings anywhere in the value.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmailPredicate;

impl PiiPredicate for EmailPredicate {
    fn is_sensitive(&self, _key: Option<&str>, value: &str) -> bool {
        EMAIL.is_match(value)
    }
}

/// Matches values against configured regexes.
#[derive(Debug, Clone)]
pub struct PatternPredicate {
    patterns: Vec<Regex>,
}

impl PatternPredicate {
    pub fn new<I, S>(patterns: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }
}

impl PiiPredicate for PatternPredicate {
    fn is_sensitive(&self, _key: Option<&str>, value: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(value))
    }
}

/// Walks JSON values and replaces sensitive string leaves.
pub struct Redactor {
    predicates: Vec<Box<dyn PiiPredicate>>,
    marker: String,
}

impl Redactor {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            predicates: vec![Box::new(EmailPredicate)],
            marker: marker.into(),
        }
    }

    pub fn with_predicate(mut self, predicate: impl PiiPredicate + 'static) -> Self {
        self.predicates.push(Box::new(predicate));
        self
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    pub fn redact(&self, value: &Value) -> Value {
        let mut out = value.clone();
        self.redact_in_place(&mut out, None);
        out
    }

    fn is_sensitive(&self, key: Option<&str>, value: &str) -> bool {
        self.predicates.iter().any(|p| p.is_sensitive(key, value))
    }

    fn redact_in_place(&self, value: &mut Value, key: Option<&str>) {
        match value {
            Value::String(s) => {
                if self.is_sensitive(key, s) {
                    *value = Value::String(self.marker.clone());
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.redact_in_place(item, key);
                }
            }
            Value::Object(map) if map.keys().any(|k| self.is_sensitive(None, k)) => {
                // Sensitive keys become the marker, numbered when several collide
                let mut redacted = 0usize;
                for (k, mut v) in std::mem::take(map) {
                    self.redact_in_place(&mut v, Some(k.as_str()));
                    let new_key = if self.is_sensitive(None, &k) {
                        redacted += 1;
                        match redacted {
                            1 => self.marker.clone(),
                            n => format!("{}#{}", self.marker, n),
                        }
                    } else {
                        k
                    };
                    map.insert(new_key, v);
                }
            }
            Value::Object(map) => {
                for (k, v) in map.iter_mut() {
                    self.redact_in_place(v, Some(k.as_str()));
                }
            }
            _ => {}
        }
    }
}

impl Default for Redactor {
    fn default() -> Self {
        Self::new(DEFAULT_REDACTION_MARKER)
    }
}
