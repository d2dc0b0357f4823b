//! Audit entry model.
//!
//! An [`AuditLogEntry`] is immutable once written. Its JSON shape uses
//! camelCase field names and lowercase enum labels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// What area of the application an entry belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditCategory {
    Auth,
    Data,
    Security,
    Privacy,
    System,
    User,
    Api,
    Error,
}

impl AuditCategory {
    pub const ALL: [AuditCategory; 8] = [
        Self::Auth,
        Self::Data,
        Self::Security,
        Self::Privacy,
        Self::System,
        Self::User,
        Self::Api,
        Self::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Data => "data",
            Self::Security => "security",
            Self::Privacy => "privacy",
            Self::System => "system",
            Self::User => "user",
            Self::Api => "api",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == s)
    }
}

/// Four-level criticality label. Ordered `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub const ALL: [Severity; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|v| v.as_str() == s)
    }
}

// ---------------------------------------------------------------------------
// Details
// ---------------------------------------------------------------------------

/// Structured details attached to an entry.
///
/// Unknown keys are kept in `extra` and serialized inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Duration of the audited operation in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<u64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_success() -> bool {
    true
}

impl Default for AuditDetails {
    fn default() -> Self {
        Self {
            resource: None,
            method: None,
            success: true,
            error_code: None,
            duration: None,
            extra: serde_json::Map::new(),
        }
    }
}

impl AuditDetails {
    /// Details for a successful operation.
    pub fn success() -> Self {
        Self::default()
    }

    /// Details for a failed operation.
    pub fn failure(error_code: impl Into<String>) -> Self {
        Self {
            success: false,
            error_code: Some(error_code.into()),
            ..Self::default()
        }
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn with_duration_ms(mut self, ms: u64) -> Self {
        self.duration = Some(ms);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLogEntry {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub user_id: Option<String>,
    pub session_id: String,
    pub action: String,
    pub category: AuditCategory,
    pub severity: Severity,
    pub details: AuditDetails,
    pub tags: Vec<String>,
    pub encrypted: bool,
    pub retention_days: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn details_flatten_extra_fields() {
        let details = AuditDetails::failure("E401")
            .with_resource("/api/mail")
            .with_extra("ip", serde_json::json!("10.0.0.1"));
        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["errorCode"], "E401");
        assert_eq!(json["ip"], "10.0.0.1");
        assert!(json.get("method").is_none());

        let back: AuditDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
    }

    #[test]
    fn missing_success_defaults_to_true() {
        let details: AuditDetails = serde_json::from_str("{}").unwrap();
        assert!(details.success);
    }

    #[test]
    fn enum_labels_are_lowercase() {
        assert_eq!(serde_json::to_string(&AuditCategory::Api).unwrap(), "\"api\"");
        assert_eq!(AuditCategory::parse("privacy"), Some(AuditCategory::Privacy));
        assert_eq!(Severity::parse("critical"), Some(Severity::Critical));
        assert!(Severity::High > Severity::Medium);
    }
}
