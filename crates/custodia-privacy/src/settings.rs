//! Process-wide privacy settings.
//!
//! Settings are plain data with defaults for every field, parsed from the
//! `[privacy]` TOML table. The governor holds them behind an `Arc` so a reload
//! swaps the whole value at once.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::classify::{DEFAULT_RETENTION_DAYS, Sensitivity};
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnonymizationSettings {
    pub enabled: bool,
    /// Items older than this are anonymized by the sweep.
    pub after_days: u32,
}

impl Default for AnonymizationSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            after_days: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsentSettings {
    /// Refuse to store high/critical items without consent.
    pub require_consent_for_sensitive: bool,
    /// Seconds a consent prompt waits before counting as denied.
    pub timeout_secs: u64,
}

impl Default for ConsentSettings {
    fn default() -> Self {
        Self {
            require_consent_for_sensitive: false,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PrivacySettings {
    /// Per-type retention defaults, used when no rule decides.
    pub retention_days: BTreeMap<String, u32>,
    /// Keywords that raise an otherwise unmatched item's sensitivity, keyed
    /// by sensitivity label (`low`, `medium`, `high`, `critical`).
    pub sensitivity_keywords: BTreeMap<String, Vec<String>>,
    pub anonymization: AnonymizationSettings,
    pub consent: ConsentSettings,
}

impl Default for PrivacySettings {
    fn default() -> Self {
        let retention_days = [
            ("note", 365),
            ("message", 90),
            ("email", 180),
            ("calendar", 365),
            ("contact", 730),
            ("financial", 2555),
            ("health", 365),
            ("location", 30),
            ("voice", 30),
            ("browsing", 30),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        let keywords = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
        let sensitivity_keywords = BTreeMap::from([
            ("high".to_string(), keywords(&["confidential", "private", "lawyer"])),
            ("medium".to_string(), keywords(&["personal", "birthday", "salary", "home"])),
        ]);

        Self {
            retention_days,
            sensitivity_keywords,
            anonymization: AnonymizationSettings::default(),
            consent: ConsentSettings::default(),
        }
    }
}

impl PrivacySettings {
    /// Parse settings from TOML. Missing fields take their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Configured default for `data_type`, else 30 days.
    pub fn retention_for_type(&self, data_type: &str) -> u32 {
        self.retention_days
            .get(data_type)
            .copied()
            .unwrap_or(DEFAULT_RETENTION_DAYS)
    }

    pub fn consent_timeout(&self) -> Duration {
        Duration::from_secs(self.consent.timeout_secs)
    }

    /// Keyword lists with their parsed sensitivity, most sensitive first.
    /// Unknown labels are skipped.
    pub fn keyword_levels(&self) -> Vec<(Sensitivity, &[String])> {
        let mut levels: Vec<(Sensitivity, &[String])> = self
            .sensitivity_keywords
            .iter()
            .filter_map(|(label, words)| match Sensitivity::parse(label) {
                Some(level) => Some((level, words.as_slice())),
                None => {
                    tracing::warn!(label = %label, "unknown sensitivity label in keyword map");
                    None
                }
            })
            .collect();
        levels.sort_by(|a, b| b.0.cmp(&a.0));
        levels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let settings = PrivacySettings::from_toml("").unwrap();
        assert_eq!(settings, PrivacySettings::default());
        assert_eq!(settings.consent.timeout_secs, 30);
    }

    #[test]
    fn partial_toml_overrides_only_given_fields() {
        let settings = PrivacySettings::from_toml(
            r#"
            [retention_days]
            note = 7

            [anonymization]
            after_days = 3

            [sensitivity_keywords]
            critical = ["launch codes"]
            "#,
        )
        .unwrap();

        assert_eq!(settings.retention_for_type("note"), 7);
        assert_eq!(settings.retention_for_type("unknown"), 30);
        assert_eq!(settings.anonymization.after_days, 3);
        assert!(settings.anonymization.enabled);
        let levels = settings.keyword_levels();
        assert_eq!(levels.len(), 1);
        assert_eq!(levels[0].0, Sensitivity::Critical);
        assert_eq!(levels[0].1, ["launch codes".to_string()]);
    }

    #[test]
    fn keyword_levels_are_most_sensitive_first() {
        let settings = PrivacySettings::default();
        let levels = settings.keyword_levels();
        let order: Vec<Sensitivity> = levels.iter().map(|(s, _)| *s).collect();
        assert_eq!(order, vec![Sensitivity::High, Sensitivity::Medium]);
    }

    #[test]
    fn malformed_toml_is_rejected() {
        assert!(PrivacySettings::from_toml("retention_days = 5").is_err());
    }
}
