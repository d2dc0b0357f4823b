//! JSON and CSV serialization of audit entries.

use serde::{Deserialize, Serialize};

use crate::entry::AuditLogEntry;
use crate::error::Result;

/// Output format for [`AuditTrail::export_logs`](crate::AuditTrail::export_logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Json,
    Csv,
}

const CSV_HEADER: [&str; 15] = [
    "id",
    "timestamp",
    "userId",
    "sessionId",
    "action",
    "category",
    "severity",
    "success",
    "resource",
    "method",
    "errorCode",
    "duration",
    "tags",
    "encrypted",
    "retentionDays",
];

pub fn export(entries: &[AuditLogEntry], format: ExportFormat) -> Result<String> {
    match format {
        ExportFormat::Json => Ok(serde_json::to_string_pretty(entries)?),
        ExportFormat::Csv => Ok(to_csv(entries)),
    }
}

/// Flat CSV, one row per entry. Tags are joined with `;`.
fn to_csv(entries: &[AuditLogEntry]) -> String {
    let mut out = String::new();
    push_row(&mut out, CSV_HEADER.iter().map(|h| h.to_string()));

    for e in entries {
        let d = &e.details;
        push_row(
            &mut out,
            [
                e.id.to_string(),
                e.timestamp.to_rfc3339(),
                e.user_id.clone().unwrap_or_default(),
                e.session_id.clone(),
                e.action.clone(),
                e.category.as_str().to_string(),
                e.severity.as_str().to_string(),
                d.success.to_string(),
                d.resource.clone().unwrap_or_default(),
                d.method.clone().unwrap_or_default(),
                d.error_code.clone().unwrap_or_default(),
                d.duration.map(|ms| ms.to_string()).unwrap_or_default(),
                e.tags.join(";"),
                e.encrypted.to_string(),
                e.retention_days.to_string(),
            ],
        );
    }
    out
}

fn push_row(out: &mut String, fields: impl IntoIterator<Item = String>) {
    let row: Vec<String> = fields.into_iter().map(|f| escape(&f)).collect();
    out.push_str(&row.join(","));
    out.push('\n');
}

/// Quote a field when it contains a delimiter, quote, or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
