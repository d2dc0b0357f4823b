//! Ordered data-classification rules.
//!
//! A [`RuleTable`] is an explicit, ordered list of `pattern -> classification`
//! rules. The text form of a value is scanned against each rule in turn and
//! the first match wins, so more sensitive rules are listed first:
//!
//! | # | Rule | Sensitivity | Retention | Encrypt |
//! |---|------|-------------|-----------|---------|
//! | 1 | `credit_card` | critical | 0 | yes |
//! | 2 | `ssn` | critical | 0 | yes |
//! | 3 | `auth_secret` | critical | 0 | yes |
//! | 4 | `financial` | high | 2555 | yes |
//! | 5 | `email` | medium | 365 | yes |
//! | 6 | `phone` | medium | 365 | yes |
//! | 7 | `address` | medium | 365 | yes |
//! | 8 | `health` | high | 365 | yes |
//! | 9 | `location` | medium | 30 | yes |
//!
//! No match yields `{low, 30, no encryption}`.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Retention applied when nothing else decides.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

/// Four-level sensitivity label. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Low,
    Medium,
    High,
    Critical,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        [Self::Low, Self::Medium, Self::High, Self::Critical]
            .into_iter()
            .find(|v| v.as_str() == s)
    }
}

/// Outcome of classifying one value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    /// Detected data type, e.g. `ssn` or `email`. Falls back to the caller's
    /// declared type when no rule matched.
    pub data_type: String,
    pub sensitivity: Sensitivity,
    pub retention_days: u32,
    pub requires_encryption: bool,
    /// Name of the matching rule, `None` for the default classification.
    pub rule: Option<String>,
}

impl Classification {
    /// The no-match default.
    pub fn unmatched(data_type: &str) -> Self {
        Self {
            data_type: data_type.to_string(),
            sensitivity: Sensitivity::Low,
            retention_days: DEFAULT_RETENTION_DAYS,
            requires_encryption: false,
            rule: None,
        }
    }
}

/// One row of the rule table.
#[derive(Debug, Clone)]
pub struct ClassificationRule {
    pub data_type: String,
    pub sensitivity: Sensitivity,
    pub retention_days: u32,
    pub requires_encryption: bool,
    pattern: Regex,
}

impl ClassificationRule {
    /// Compile a rule. Fails on an invalid pattern.
    pub fn new(
        data_type: impl Into<String>,
        pattern: &str,
        sensitivity: Sensitivity,
        retention_days: u32,
        requires_encryption: bool,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            data_type: data_type.into(),
            sensitivity,
            retention_days,
            requires_encryption,
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    fn classification(&self) -> Classification {
        Classification {
            data_type: self.data_type.clone(),
            sensitivity: self.sensitivity,
            retention_days: self.retention_days,
            requires_encryption: self.requires_encryption,
            rule: Some(self.data_type.clone()),
        }
    }
}

// Built-in patterns, shared with the anonymizers.
pub(crate) const CARD_PATTERN: &str = r"\b(?:\d{4}[- ]?){3}\d{4}\b";
pub(crate) const SSN_PATTERN: &str = r"\b\d{3}-\d{2}-\d{4}\b";
pub(crate) const AUTH_SECRET_PATTERN: &str =
    r"(?i)\b(?:password|passwd|passcode|pin|api[_-]?key|secret|access[_ ]token|private[_ ]key)\b";
pub(crate) const CURRENCY_PATTERN: &str =
    r"(?i)(?:[$€£¥]\s?\d[\d,]*(?:\.\d{1,2})?|\b\d[\d,]*(?:\.\d{1,2})?\s?(?:usd|eur|gbp|dollars?|euros?)\b)";
pub(crate) const EMAIL_PATTERN: &str = r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b";
pub(crate) const PHONE_PATTERN: &str = r"(?:\+\d{1,3}[-. ]?)?\(?\b\d{3}\)?[-. ]?\d{3}[-. ]?\d{4}\b";
pub(crate) const ADDRESS_PATTERN: &str = r"(?i)\b\d{1,5}\s+(?:[a-z0-9.]+\s+){0,4}(?:street|st|avenue|ave|road|rd|boulevard|blvd|lane|ln|drive|dr|court|ct|way|place|pl)\b";
pub(crate) const HEALTH_PATTERN: &str = r"(?i)\b(?:diagnos\w*|prescription\w*|medication\w*|symptom\w*|doctor|hospital|therapy|therapist|allerg\w*|blood pressure|illness|disease)\b";
pub(crate) const COORDINATES_PATTERN: &str = r"-?\b\d{1,2}\.\d{3,}\s*,\s*-?\d{1,3}\.\d{3,}\b";

/// Ordered, first-match-wins classification table.
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<ClassificationRule>,
}

impl RuleTable {
    /// Build a table from explicit rules, evaluated in the given order.
    pub fn new(rules: Vec<ClassificationRule>) -> Self {
        Self { rules }
    }

    /// The built-in rule set.
    pub fn builtin() -> Self {
        use Sensitivity::*;

        let specs: [(&str, &str, Sensitivity, u32); 9] = [
            ("credit_card", CARD_PATTERN, Critical, 0),
            ("ssn", SSN_PATTERN, Critical, 0),
            ("auth_secret", AUTH_SECRET_PATTERN, Critical, 0),
            ("financial", CURRENCY_PATTERN, High, 2555),
            ("email", EMAIL_PATTERN, Medium, 365),
            ("phone", PHONE_PATTERN, Medium, 365),
            ("address", ADDRESS_PATTERN, Medium, 365),
            ("health", HEALTH_PATTERN, High, 365),
            ("location", COORDINATES_PATTERN, Medium, 30),
        ];

        let rules = specs
            .into_iter()
            .filter_map(|(name, pattern, sensitivity, retention)| {
                match ClassificationRule::new(name, pattern, sensitivity, retention, true) {
                    Ok(rule) => Some(rule),
                    Err(e) => {
                        tracing::error!(rule = name, error = %e, "built-in classification rule failed to compile");
                        None
                    }
                }
            })
            .collect();
        Self { rules }
    }

    pub fn rules(&self) -> &[ClassificationRule] {
        &self.rules
    }

    /// The first matching rule, if any.
    pub fn first_match(&self, text: &str) -> Option<&ClassificationRule> {
        self.rules.iter().find(|rule| rule.is_match(text))
    }

    /// Classify `text`, defaulting to `{low, 30, false}` under `declared_type`.
    pub fn classify_text(&self, text: &str, declared_type: &str) -> Classification {
        match self.first_match(text) {
            Some(rule) => rule.classification(),
            None => Classification::unmatched(declared_type),
        }
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Text form of a value used for scanning: strings as-is, anything else as
/// compact JSON.
pub fn scan_text(data: &Value) -> String {
    match data {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
