//! Audit trail for Custodia.
//!
//! Every security-relevant action in the application is recorded through
//! [`AuditTrail::log_action`]. Entries are scored for severity, sealed when
//! sensitive, retained for a period derived from their category and severity,
//! and swept once that period has elapsed.
//!
//! # Modules
//!
//! - [`entry`] — the entry model and its JSON shape.
//! - [`policy`] — severity, encryption and retention rules.
//! - [`query`] — filtering and pagination.
//! - [`report`] — aggregate statistics and anomaly detection.
//! - [`export`] — JSON and CSV export.
//! - [`trail`] — the buffered, persisted [`AuditTrail`] service.
//! - [`error`] — Unified error types.

pub mod entry;
pub mod error;
pub mod export;
pub mod policy;
pub mod query;
pub mod report;
pub mod trail;

// Re-export the most commonly used types at the crate root for convenience.
pub use entry::{AuditCategory, AuditDetails, AuditLogEntry, Severity};
pub use error::{AuditError, Result};
pub use export::ExportFormat;
pub use query::AuditFilter;
pub use report::{Anomaly, AnomalyReason, AuditReport, UnusualHours};
pub use trail::{AuditSettings, AuditTrail, IntegrityViolation, ViolationKind};
