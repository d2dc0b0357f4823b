//! Log filtering and pagination.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entry::{AuditCategory, AuditLogEntry, Severity};

/// Criteria for [`AuditTrail::query_logs`](crate::AuditTrail::query_logs).
///
/// Every set field must match. `action` is a substring match; `tags` matches
/// when the entry carries at least one of the listed tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditFilter {
    pub user_id: Option<String>,
    pub session_id: Option<String>,
    pub category: Option<AuditCategory>,
    pub severity: Option<Severity>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub tags: Vec<String>,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn category(mut self, category: AuditCategory) -> Self {
        self.category = Some(category);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn action_contains(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn between(mut self, from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        self.date_from = from;
        self.date_to = to;
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = offset;
        self.limit = Some(limit);
        self
    }

    /// Whether `entry` satisfies every criterion (pagination aside).
    pub fn matches(&self, entry: &AuditLogEntry) -> bool {
        if let Some(user_id) = &self.user_id {
            if entry.user_id.as_deref() != Some(user_id.as_str()) {
                return false;
            }
        }
        if let Some(session_id) = &self.session_id {
            if &entry.session_id != session_id {
                return false;
            }
        }
        if self.category.is_some_and(|c| c != entry.category) {
            return false;
        }
        if self.severity.is_some_and(|s| s != entry.severity) {
            return false;
        }
        if let Some(action) = &self.action {
            if !entry.action.contains(action.as_str()) {
                return false;
            }
        }
        if let Some(resource) = &self.resource {
            if entry.details.resource.as_deref() != Some(resource.as_str()) {
                return false;
            }
        }
        if self.date_from.is_some_and(|from| entry.timestamp < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| entry.timestamp > to) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| entry.tags.contains(t)) {
            return false;
        }
        true
    }

    /// Filter, sort newest-first, then apply offset/limit.
    pub fn apply<'a, I>(&self, entries: I) -> Vec<AuditLogEntry>
    where
        I: IntoIterator<Item = &'a AuditLogEntry>,
    {
        let mut matched: Vec<AuditLogEntry> = entries
            .into_iter()
            .filter(|e| self.matches(e))
            .cloned()
            .collect();
        sort_newest_first(&mut matched);

        let page = matched.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => page.take(limit).collect(),
            None => page.collect(),
        }
    }
}

/// Newest first; ties broken by id, which is time-ordered.
pub(crate) fn sort_newest_first(entries: &mut [AuditLogEntry]) {
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::AuditDetails;
    use chrono::Duration;
    use uuid::Uuid;

    fn entry(action: &str, category: AuditCategory, minutes_ago: i64) -> AuditLogEntry {
        AuditLogEntry {
            id: Uuid::now_v7(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            user_id: Some("u1".into()),
            session_id: "s1".into(),
            action: action.into(),
            category,
            severity: Severity::Low,
            details: AuditDetails::success().with_resource("/inbox"),
            tags: vec!["mail".into()],
            encrypted: false,
            retention_days: 365,
        }
    }

    #[test]
    fn substring_and_category_filters() {
        let entries = vec![
            entry("email_read", AuditCategory::Data, 3),
            entry("email_send", AuditCategory::Api, 2),
            entry("calendar_read", AuditCategory::Data, 1),
        ];

        let filter = AuditFilter::new()
            .action_contains("email")
            .category(AuditCategory::Data);
        let result = filter.apply(&entries);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].action, "email_read");
    }

    #[test]
    fn results_are_newest_first_and_paginated() {
        let entries = vec![
            entry("a", AuditCategory::User, 30),
            entry("b", AuditCategory::User, 20),
            entry("c", AuditCategory::User, 10),
        ];

        let all = AuditFilter::new().apply(&entries);
        let actions: Vec<&str> = all.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["c", "b", "a"]);

        let page = AuditFilter::new().page(1, 1).apply(&entries);
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].action, "b");
    }

    #[test]
    fn tag_and_resource_filters() {
        let entries = vec![entry("x", AuditCategory::User, 1)];
        let mut filter = AuditFilter::new();
        filter.tags = vec!["calendar".into(), "mail".into()];
        assert_eq!(filter.apply(&entries).len(), 1);

        filter.resource = Some("/outbox".into());
        assert!(filter.apply(&entries).is_empty());
    }

    #[test]
    fn date_range_is_inclusive() {
        let e = entry("x", AuditCategory::User, 0);
        let at = e.timestamp;
        let filter = AuditFilter::new().between(Some(at), Some(at));
        assert!(filter.matches(&e));
        let filter = AuditFilter::new().between(Some(at + Duration::seconds(1)), None);
        assert!(!filter.matches(&e));
    }
}
