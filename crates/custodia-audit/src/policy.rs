//! Severity, encryption and retention policy.
//!
//! All three are pure functions of `(action, category, success)`, so the same
//! inputs always produce the same classification.

use crate::entry::{AuditCategory, Severity};

/// Actions that are always `critical`.
pub const CRITICAL_ACTIONS: &[&str] = &[
    "data_breach_detected",
    "unauthorized_access",
    "privilege_escalation",
    "encryption_key_compromised",
    "account_takeover",
    "security_policy_disabled",
    "mass_data_export",
];

/// Actions that are at least `high` and always encrypted.
pub const SENSITIVE_ACTIONS: &[&str] = &[
    "login",
    "logout",
    "password_change",
    "biometric_register",
    "biometric_auth",
    "pin_setup",
    "credential_removed",
    "data_export",
    "data_delete",
    "view_sensitive_data",
    "permission_change",
    "consent_granted",
    "consent_revoked",
];

/// Actions that force an immediate flush regardless of severity.
pub const CRITICAL_EVENTS: &[&str] = &[
    "failed_login",
    "account_locked",
    "suspicious_activity",
    "brute_force_detected",
    "integrity_violation",
];

/// Retention for the security and privacy categories, and for `critical`.
pub const MAX_RETENTION_DAYS: u32 = 2555;

pub fn is_critical_action(action: &str) -> bool {
    CRITICAL_ACTIONS.contains(&action)
}

pub fn is_sensitive_action(action: &str) -> bool {
    SENSITIVE_ACTIONS.contains(&action)
}

pub fn is_critical_event(action: &str) -> bool {
    CRITICAL_EVENTS.contains(&action)
}

/// Severity of an entry.
///
/// First match wins:
/// 1. `critical` for a critical action, or a failed security event.
/// 2. `high` for the security/privacy categories or a sensitive action.
/// 3. `medium` for the auth/data categories.
/// 4. `low` otherwise.
pub fn severity_for(action: &str, category: AuditCategory, success: bool) -> Severity {
    if is_critical_action(action) || (category == AuditCategory::Security && !success) {
        Severity::Critical
    } else if matches!(category, AuditCategory::Security | AuditCategory::Privacy)
        || is_sensitive_action(action)
    {
        Severity::High
    } else if matches!(category, AuditCategory::Auth | AuditCategory::Data) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Whether the entry is sealed before being persisted.
pub fn should_encrypt(action: &str, category: AuditCategory, severity: Severity) -> bool {
    is_sensitive_action(action)
        || matches!(category, AuditCategory::Security | AuditCategory::Privacy)
        || severity == Severity::Critical
}

/// Days an entry is kept before the retention sweep removes it.
pub fn retention_days(category: AuditCategory, severity: Severity) -> u32 {
    if matches!(category, AuditCategory::Security | AuditCategory::Privacy) {
        return MAX_RETENTION_DAYS;
    }
    match severity {
        Severity::Critical => MAX_RETENTION_DAYS,
        Severity::High => 1825,
        Severity::Medium => 1095,
        Severity::Low => 365,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_action_wins_over_category() {
        assert_eq!(
            severity_for("data_breach_detected", AuditCategory::System, true),
            Severity::Critical
        );
    }

    #[test]
    fn failed_security_event_is_critical() {
        assert_eq!(
            severity_for("firewall_check", AuditCategory::Security, false),
            Severity::Critical
        );
        assert_eq!(
            severity_for("firewall_check", AuditCategory::Security, true),
            Severity::High
        );
    }

    #[test]
    fn sensitive_action_is_high() {
        assert_eq!(severity_for("login", AuditCategory::Auth, true), Severity::High);
        assert_eq!(severity_for("token_refresh", AuditCategory::Auth, true), Severity::Medium);
        assert_eq!(severity_for("page_view", AuditCategory::User, true), Severity::Low);
        // Failure outside the security category does not escalate.
        assert_eq!(severity_for("page_view", AuditCategory::User, false), Severity::Low);
    }

    #[test]
    fn encryption_rules() {
        assert!(should_encrypt("login", AuditCategory::Auth, Severity::High));
        assert!(should_encrypt("anything", AuditCategory::Privacy, Severity::High));
        assert!(should_encrypt("anything", AuditCategory::System, Severity::Critical));
        assert!(!should_encrypt("page_view", AuditCategory::User, Severity::Low));
    }

    #[test]
    fn security_and_privacy_always_get_max_retention() {
        for severity in Severity::ALL {
            assert_eq!(retention_days(AuditCategory::Security, severity), 2555);
            assert_eq!(retention_days(AuditCategory::Privacy, severity), 2555);
        }
        assert_eq!(retention_days(AuditCategory::Data, Severity::Medium), 1095);
        assert_eq!(retention_days(AuditCategory::Auth, Severity::High), 1825);
        assert_eq!(retention_days(AuditCategory::User, Severity::Low), 365);
    }

    #[test]
    fn classification_is_deterministic() {
        for category in AuditCategory::ALL {
            for success in [true, false] {
                let a = severity_for("login", category, success);
                let b = severity_for("login", category, success);
                assert_eq!(a, b);
                assert_eq!(retention_days(category, a), retention_days(category, b));
            }
        }
    }
}
