//! Aggregate reports and anomaly detection.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::{AuditCategory, AuditLogEntry, Severity};

/// How many actions / resources the report ranks.
const TOP_N: usize = 10;

/// Window of local hours considered unusual for activity, `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusualHours {
    pub start: u32,
    pub end: u32,
}

impl Default for UnusualHours {
    fn default() -> Self {
        Self { start: 2, end: 5 }
    }
}

impl UnusualHours {
    /// Whether `hour` falls in the window. Windows may wrap past midnight.
    pub fn contains(&self, hour: u32) -> bool {
        if self.start <= self.end {
            hour >= self.start && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Why an entry was flagged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyReason {
    FailedLogin,
    SecurityFailure,
    CriticalSeverity,
    UnusualHour,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub entry_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub user_id: Option<String>,
    pub reasons: Vec<AnomalyReason>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedCount {
    pub name: String,
    pub count: u64,
}

/// Summary statistics for a time window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub generated_at: DateTime<Utc>,
    pub total_events: u64,
    pub by_category: BTreeMap<String, u64>,
    pub by_severity: BTreeMap<String, u64>,
    /// Fraction of entries with `success = true`, `0.0` when empty.
    pub success_rate: f64,
    pub error_rate: f64,
    pub top_actions: Vec<RankedCount>,
    pub top_resources: Vec<RankedCount>,
    pub security_events: u64,
    pub privacy_events: u64,
    /// Local date (`YYYY-MM-DD`) to count.
    pub daily: BTreeMap<String, u64>,
    /// Local hour of day to count.
    pub hourly: [u64; 24],
    pub anomalies: Vec<Anomaly>,
}

/// Anomaly reasons for one entry, empty when it is unremarkable.
pub fn anomaly_reasons(
    entry: &AuditLogEntry,
    offset: FixedOffset,
    unusual: UnusualHours,
) -> Vec<AnomalyReason> {
    let mut reasons = Vec::new();
    if entry.action == "failed_login" {
        reasons.push(AnomalyReason::FailedLogin);
    }
    if entry.category == AuditCategory::Security && !entry.details.success {
        reasons.push(AnomalyReason::SecurityFailure);
    }
    if entry.severity == Severity::Critical {
        reasons.push(AnomalyReason::CriticalSeverity);
    }
    if unusual.contains(entry.timestamp.with_timezone(&offset).hour()) {
        reasons.push(AnomalyReason::UnusualHour);
    }
    reasons
}

/// Build a report over `entries`, which the caller has already windowed.
pub fn build_report(
    entries: &[AuditLogEntry],
    date_from: Option<DateTime<Utc>>,
    date_to: Option<DateTime<Utc>>,
    generated_at: DateTime<Utc>,
    offset: FixedOffset,
    unusual: UnusualHours,
) -> AuditReport {
    let mut by_category = BTreeMap::new();
    let mut by_severity = BTreeMap::new();
    let mut actions: HashMap<&str, u64> = HashMap::new();
    let mut resources: HashMap<&str, u64> = HashMap::new();
    let mut daily = BTreeMap::new();
    let mut hourly = [0u64; 24];
    let mut anomalies = Vec::new();
    let mut successes = 0u64;

    for entry in entries {
        *by_category.entry(entry.category.as_str().to_string()).or_insert(0) += 1;
        *by_severity.entry(entry.severity.as_str().to_string()).or_insert(0) += 1;
        *actions.entry(entry.action.as_str()).or_insert(0) += 1;
        if let Some(resource) = entry.details.resource.as_deref() {
            *resources.entry(resource).or_insert(0) += 1;
        }
        if entry.details.success {
            successes += 1;
        }

        let local = entry.timestamp.with_timezone(&offset);
        *daily.entry(local.format("%Y-%m-%d").to_string()).or_insert(0) += 1;
        hourly[local.hour() as usize] += 1;

        let reasons = anomaly_reasons(entry, offset, unusual);
        if !reasons.is_empty() {
            anomalies.push(Anomaly {
                entry_id: entry.id,
                timestamp: entry.timestamp,
                action: entry.action.clone(),
                user_id: entry.user_id.clone(),
                reasons,
            });
        }
    }

    let total = entries.len() as u64;
    let (success_rate, error_rate) = if total == 0 {
        (0.0, 0.0)
    } else {
        let rate = successes as f64 / total as f64;
        (rate, 1.0 - rate)
    };

    let count = |category: AuditCategory| entries.iter().filter(|e| e.category == category).count() as u64;

    AuditReport {
        date_from,
        date_to,
        generated_at,
        total_events: total,
        security_events: count(AuditCategory::Security),
        privacy_events: count(AuditCategory::Privacy),
        by_category,
        by_severity,
        success_rate,
        error_rate,
        top_actions: top_n(actions),
        top_resources: top_n(resources),
        daily,
        hourly,
        anomalies,
    }
}

/// Highest counts first, ties broken alphabetically.
fn top_n(counts: HashMap<&str, u64>) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .into_iter()
        .map(|(name, count)| RankedCount {
            name: name.to_string(),
            count,
        })
        .collect();
    ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    ranked.truncate(TOP_N);
    ranked
}
