//! The audit trail service.
//!
//! [`AuditTrail`] scores and buffers entries in memory and persists them in
//! batches under one key of the shared [`KeyValueStore`]. Each persisted
//! record keeps `{id, timestamp, category, severity, retentionDays}` in clear
//! so retention sweeps never decrypt; the full entry is either stored inline
//! or, when `encrypted`, sealed into an [`Envelope`] with the vault
//! passphrase.
//!
//! A critical entry, or an action in the critical-event set, triggers an
//! immediate flush. A failed flush puts the entries back in the buffer.
//!
//! [`KeyValueStore`]: custodia_vault::KeyValueStore

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration, FixedOffset, Local, Offset, Utc};
use custodia_kernel::{InFlight, SessionId, SharedClock};
use custodia_vault::{CryptoVault, Envelope};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::entry::{AuditCategory, AuditDetails, AuditLogEntry, Severity};
use crate::error::{AuditError, Result};
use crate::export::{self, ExportFormat};
use crate::policy;
use crate::query::AuditFilter;
use crate::report::{self, AuditReport, UnusualHours};

/// Default storage key for the persisted log.
pub const DEFAULT_STORAGE_KEY: &str = "audit_logs";

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Audit trail configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditSettings {
    /// Store key holding the persisted log.
    pub storage_key: String,
    /// Offset used for report day/hour buckets. `None` uses the host offset
    /// at construction time.
    pub utc_offset_minutes: Option<i32>,
    pub unusual_hours: UnusualHours,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
            utc_offset_minutes: None,
            unusual_hours: UnusualHours::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The persisted log could not be read or parsed as a whole.
    Unreadable,
    DuplicateId,
    InvalidTimestamp,
    FutureTimestamp,
    MissingField,
}

/// One problem found by [`AuditTrail::verify_integrity`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityViolation {
    pub kind: ViolationKind,
    /// Position in the persisted log, when the problem is record-specific.
    pub index: Option<usize>,
    pub id: Option<String>,
    pub message: String,
}

impl IntegrityViolation {
    fn at(kind: ViolationKind, index: usize, id: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            kind,
            index: Some(index),
            id: id.map(str::to_string),
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted representation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredRecord {
    id: Uuid,
    timestamp: DateTime<Utc>,
    category: AuditCategory,
    severity: Severity,
    retention_days: u32,
    encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry: Option<AuditLogEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    sealed: Option<Envelope>,
}

/// A record as loaded from the store.
///
/// `raw` is written back verbatim, so records that fail to parse or decrypt
/// are preserved rather than silently dropped.
struct Persisted {
    raw: Value,
    record: Option<StoredRecord>,
    entry: Option<AuditLogEntry>,
}

impl Persisted {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.record
            .as_ref()
            .is_some_and(|r| now - r.timestamp > Duration::days(i64::from(r.retention_days)))
    }
}

#[derive(Default)]
struct AuditState {
    buffer: Vec<AuditLogEntry>,
    /// Lazily loaded on first use.
    persisted: Option<Vec<Persisted>>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Structured, severity-scored, selectively encrypted event log.
pub struct AuditTrail {
    vault: Arc<CryptoVault>,
    clock: SharedClock,
    session_id: SessionId,
    settings: AuditSettings,
    offset: FixedOffset,
    state: Mutex<AuditState>,
    cleanup_in_flight: InFlight,
}

impl AuditTrail {
    pub fn new(
        vault: Arc<CryptoVault>,
        clock: SharedClock,
        session_id: SessionId,
        settings: AuditSettings,
    ) -> Self {
        let offset = settings
            .utc_offset_minutes
            .and_then(|m| FixedOffset::east_opt(m.saturating_mul(60)))
            .unwrap_or_else(|| Local::now().offset().fix());

        tracing::info!(
            session_id = %session_id,
            storage_key = %settings.storage_key,
            utc_offset = %offset,
            "audit trail initialised"
        );

        Self {
            vault,
            clock,
            session_id,
            settings,
            offset,
            state: Mutex::new(AuditState::default()),
            cleanup_in_flight: InFlight::new(),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Entries waiting for the next flush.
    pub fn buffered_len(&self) -> usize {
        self.lock().buffer.len()
    }

    // -- Logging ------------------------------------------------------------

    /// Record an action.
    ///
    /// Severity, encryption and retention are derived from
    /// `(action, category, details.success)`. Never fails: an immediate flush
    /// that errors is logged and retried on the next flush.
    pub fn log_action(
        &self,
        action: &str,
        category: AuditCategory,
        details: AuditDetails,
        user_id: Option<&str>,
        tags: &[&str],
    ) -> AuditLogEntry {
        let severity = policy::severity_for(action, category, details.success);
        let entry = AuditLogEntry {
            id: Uuid::now_v7(),
            timestamp: self.clock.now(),
            user_id: user_id.map(str::to_string),
            session_id: self.session_id.to_string(),
            action: action.to_string(),
            category,
            severity,
            details,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            encrypted: policy::should_encrypt(action, category, severity),
            retention_days: policy::retention_days(category, severity),
        };

        tracing::debug!(
            id = %entry.id,
            action = action,
            category = category.as_str(),
            severity = severity.as_str(),
            "audit entry buffered"
        );

        let mut state = self.lock();
        state.buffer.push(entry.clone());

        if severity == Severity::Critical || policy::is_critical_event(action) {
            if let Err(e) = self.flush_locked(&mut state) {
                tracing::warn!(error = %e, action = action, "immediate audit flush failed; entries kept for retry");
            }
        }
        entry
    }

    pub fn log_auth(&self, action: &str, user_id: Option<&str>, success: bool) -> AuditLogEntry {
        let details = if success {
            AuditDetails::success()
        } else {
            AuditDetails::failure("AUTH_FAILED")
        };
        self.log_action(action, AuditCategory::Auth, details, user_id, &["auth"])
    }

    pub fn log_data_access(&self, action: &str, resource: &str, user_id: Option<&str>) -> AuditLogEntry {
        let details = AuditDetails::success().with_resource(resource);
        self.log_action(action, AuditCategory::Data, details, user_id, &["data_access"])
    }

    pub fn log_security_event(&self, action: &str, details: AuditDetails) -> AuditLogEntry {
        self.log_action(action, AuditCategory::Security, details, None, &["security"])
    }

    pub fn log_privacy_event(
        &self,
        action: &str,
        details: AuditDetails,
        user_id: Option<&str>,
    ) -> AuditLogEntry {
        self.log_action(action, AuditCategory::Privacy, details, user_id, &["privacy"])
    }

    // -- Persistence --------------------------------------------------------

    /// Persist every buffered entry. Returns how many were written.
    pub fn flush(&self) -> Result<usize> {
        let mut state = self.lock();
        self.flush_locked(&mut state)
    }

    /// Best-effort final flush.
    pub fn close(&self) -> Result<()> {
        let written = self.flush()?;
        tracing::info!(written, "audit trail closed");
        Ok(())
    }

    fn flush_locked(&self, state: &mut AuditState) -> Result<usize> {
        if state.buffer.is_empty() {
            return Ok(0);
        }
        let pending = std::mem::take(&mut state.buffer);

        match self.persist(state, &pending) {
            Ok(()) => {
                tracing::debug!(count = pending.len(), "audit buffer flushed");
                Ok(pending.len())
            }
            Err(e) => {
                // Put the batch back ahead of anything buffered since.
                let newer = std::mem::replace(&mut state.buffer, pending);
                state.buffer.extend(newer);
                Err(e)
            }
        }
    }

    fn persist(&self, state: &mut AuditState, pending: &[AuditLogEntry]) -> Result<()> {
        self.ensure_loaded(state)?;

        let fresh = pending
            .iter()
            .map(|entry| self.to_persisted(entry))
            .collect::<Result<Vec<_>>>()?;

        let persisted = state.persisted.get_or_insert_with(Vec::new);
        self.write(persisted.iter().chain(fresh.iter()).map(|p| &p.raw))?;
        persisted.extend(fresh);
        Ok(())
    }

    fn to_persisted(&self, entry: &AuditLogEntry) -> Result<Persisted> {
        let (inline, sealed) = if entry.encrypted {
            (None, Some(self.vault.seal(entry)?))
        } else {
            (Some(entry.clone()), None)
        };
        let record = StoredRecord {
            id: entry.id,
            timestamp: entry.timestamp,
            category: entry.category,
            severity: entry.severity,
            retention_days: entry.retention_days,
            encrypted: entry.encrypted,
            entry: inline,
            sealed,
        };
        Ok(Persisted {
            raw: serde_json::to_value(&record)?,
            record: Some(record),
            entry: Some(entry.clone()),
        })
    }

    fn write<'a>(&self, raws: impl Iterator<Item = &'a Value>) -> Result<()> {
        let raws: Vec<&Value> = raws.collect();
        let json = serde_json::to_string(&raws)?;
        self.vault.store().set(&self.settings.storage_key, &json)?;
        Ok(())
    }

    fn ensure_loaded(&self, state: &mut AuditState) -> Result<()> {
        if state.persisted.is_none() {
            state.persisted = Some(self.load()?);
        }
        Ok(())
    }

    fn load(&self) -> Result<Vec<Persisted>> {
        let Some(json) = self.vault.store().get(&self.settings.storage_key)? else {
            return Ok(Vec::new());
        };
        let raws: Vec<Value> = match serde_json::from_str(&json) {
            Ok(raws) => raws,
            Err(e) => {
                // Set the unreadable log aside and start over from empty.
                let quarantine = format!(
                    "{}.corrupt.{}",
                    self.settings.storage_key,
                    self.clock.now().timestamp_millis()
                );
                self.vault.store().set(&quarantine, &json)?;
                tracing::warn!(
                    error = %e,
                    quarantined_as = %quarantine,
                    "persisted audit log is corrupt, starting a new one"
                );
                return Ok(Vec::new());
            }
        };
        let loaded: Vec<Persisted> = raws.into_iter().map(|raw| self.decode(raw)).collect();
        tracing::debug!(count = loaded.len(), "persisted audit log loaded");
        Ok(loaded)
    }

    fn decode(&self, raw: Value) -> Persisted {
        let record = match serde_json::from_value::<StoredRecord>(raw.clone()) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "unparsable audit record kept as-is");
                return Persisted {
                    raw,
                    record: None,
                    entry: None,
                };
            }
        };

        let entry = match (&record.entry, &record.sealed) {
            (Some(entry), _) => Some(entry.clone()),
            (None, Some(envelope)) => match self.vault.open::<AuditLogEntry>(envelope) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(id = %record.id, error = %e, "sealed audit record could not be opened");
                    None
                }
            },
            (None, None) => None,
        };

        Persisted {
            raw,
            record: Some(record),
            entry,
        }
    }

    // -- Reading ------------------------------------------------------------

    /// Entries matching `filter`, newest first, including unflushed ones.
    pub fn query_logs(&self, filter: &AuditFilter) -> Result<Vec<AuditLogEntry>> {
        let mut guard = self.lock();
        let state = &mut *guard;
        self.ensure_loaded(state)?;

        let persisted = state.persisted.as_deref().unwrap_or_default();
        let entries = persisted
            .iter()
            .filter_map(|p| p.entry.as_ref())
            .chain(state.buffer.iter());
        Ok(filter.apply(entries))
    }

    /// Aggregate report over `[date_from, date_to]`.
    pub fn generate_report(
        &self,
        date_from: Option<DateTime<Utc>>,
        date_to: Option<DateTime<Utc>>,
    ) -> Result<AuditReport> {
        let filter = AuditFilter::new().between(date_from, date_to);
        let entries = self.query_logs(&filter)?;
        Ok(report::build_report(
            &entries,
            date_from,
            date_to,
            self.clock.now(),
            self.offset,
            self.settings.unusual_hours,
        ))
    }

    /// Serialize the entries matching `filter`.
    pub fn export_logs(&self, format: ExportFormat, filter: &AuditFilter) -> Result<String> {
        let entries = self.query_logs(filter)?;
        tracing::info!(count = entries.len(), ?format, "audit logs exported");
        export::export(&entries, format)
    }

    // -- Maintenance --------------------------------------------------------

    /// Remove persisted entries older than their own retention.
    ///
    /// Returns `Ok(None)` when another sweep is still running.
    pub fn cleanup_old_logs(&self) -> Result<Option<usize>> {
        let Some(_in_flight) = self.cleanup_in_flight.try_enter() else {
            tracing::debug!("audit cleanup already running; skipped");
            return Ok(None);
        };

        let now = self.clock.now();
        let mut guard = self.lock();
        let state = &mut *guard;
        self.ensure_loaded(state)?;
        let persisted = state.persisted.get_or_insert_with(Vec::new);

        let removed = persisted.iter().filter(|p| p.is_expired(now)).count();
        if removed > 0 {
            self.write(persisted.iter().filter(|p| !p.is_expired(now)).map(|p| &p.raw))?;
            persisted.retain(|p| !p.is_expired(now));
            tracing::info!(removed, remaining = persisted.len(), "expired audit entries removed");
        }
        Ok(Some(removed))
    }

    /// Check the persisted log for structural problems.
    ///
    /// Reads straight from the store and never fails; unflushed entries are
    /// not inspected.
    pub fn verify_integrity(&self) -> Vec<IntegrityViolation> {
        let raw = match self.vault.store().get(&self.settings.storage_key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                return vec![IntegrityViolation {
                    kind: ViolationKind::Unreadable,
                    index: None,
                    id: None,
                    message: format!("failed to read audit log: {e}"),
                }];
            }
        };
        let records: Vec<Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(e) => {
                return vec![IntegrityViolation {
                    kind: ViolationKind::Unreadable,
                    index: None,
                    id: None,
                    message: format!("audit log is not a JSON array: {e}"),
                }];
            }
        };

        let now = self.clock.now();
        let mut seen = HashSet::new();
        let mut violations = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let id = record.get("id").and_then(Value::as_str);

            for field in ["id", "timestamp", "category", "severity", "retentionDays"] {
                if record.get(field).is_none_or(Value::is_null) {
                    violations.push(IntegrityViolation::at(
                        ViolationKind::MissingField,
                        index,
                        id,
                        format!("missing field `{field}`"),
                    ));
                }
            }
            if let Some(entry) = record.get("entry") {
                for field in ["id", "timestamp", "sessionId", "action", "category", "severity", "details"] {
                    if entry.get(field).is_none_or(Value::is_null) {
                        violations.push(IntegrityViolation::at(
                            ViolationKind::MissingField,
                            index,
                            id,
                            format!("missing entry field `{field}`"),
                        ));
                    }
                }
            } else if record.get("sealed").is_none() {
                violations.push(IntegrityViolation::at(
                    ViolationKind::MissingField,
                    index,
                    id,
                    "record has neither `entry` nor `sealed`",
                ));
            }

            if let Some(id) = id {
                if !seen.insert(id.to_string()) {
                    violations.push(IntegrityViolation::at(
                        ViolationKind::DuplicateId,
                        index,
                        Some(id),
                        "duplicate entry id",
                    ));
                }
            }

            if let Some(ts) = record.get("timestamp").and_then(Value::as_str) {
                match DateTime::parse_from_rfc3339(ts) {
                    Ok(parsed) if parsed.with_timezone(&Utc) > now => {
                        violations.push(IntegrityViolation::at(
                            ViolationKind::FutureTimestamp,
                            index,
                            id,
                            format!("timestamp {ts} is in the future"),
                        ));
                    }
                    Ok(_) => {}
                    Err(_) => violations.push(IntegrityViolation::at(
                        ViolationKind::InvalidTimestamp,
                        index,
                        id,
                        format!("unparsable timestamp `{ts}`"),
                    )),
                }
            }
        }

        if !violations.is_empty() {
            tracing::warn!(count = violations.len(), "audit integrity violations found");
        }
        violations
    }

    /// [`verify_integrity`](Self::verify_integrity) as a `Result`.
    pub fn ensure_integrity(&self) -> Result<()> {
        let violations = self.verify_integrity();
        match violations.first() {
            None => Ok(()),
            Some(first) => Err(AuditError::IntegrityViolation {
                count: violations.len(),
                first: first.message.clone(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use custodia_kernel::{Clock, ManualClock};
    use custodia_vault::{KeyValueStore, MemoryStore};

    struct Fixture {
        store: Arc<dyn KeyValueStore>,
        clock: Arc<ManualClock>,
        trail: AuditTrail,
    }

    fn fixture() -> Fixture {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let vault = Arc::new(CryptoVault::new(Arc::clone(&store), "audit-test"));
        let clock = Arc::new(ManualClock::starting_now());
        let settings = AuditSettings {
            utc_offset_minutes: Some(0),
            ..AuditSettings::default()
        };
        let trail = AuditTrail::new(vault, clock.clone(), SessionId::new(), settings);
        Fixture { store, clock, trail }
    }

    #[test]
    fn low_severity_entries_wait_for_flush() {
        let f = fixture();
        let entry = f.trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
        assert_eq!(entry.severity, Severity::Low);
        assert!(!entry.encrypted);
        assert_eq!(f.trail.buffered_len(), 1);
        assert!(f.store.get(DEFAULT_STORAGE_KEY).unwrap().is_none());

        assert_eq!(f.trail.flush().unwrap(), 1);
        assert_eq!(f.trail.buffered_len(), 0);
        assert!(f.store.get(DEFAULT_STORAGE_KEY).unwrap().is_some());
    }

    #[test]
    fn critical_event_flushes_immediately() {
        let f = fixture();
        f.trail.log_auth("failed_login", Some("u1"), false);
        assert_eq!(f.trail.buffered_len(), 0);
        assert!(f.store.get(DEFAULT_STORAGE_KEY).unwrap().is_some());
    }

    #[test]
    fn encrypted_entries_are_sealed_at_rest() {
        let f = fixture();
        f.trail.log_privacy_event(
            "consent_granted",
            AuditDetails::success().with_resource("contacts-secret-resource"),
            Some("u1"),
        );
        f.trail.flush().unwrap();

        let raw = f.store.get(DEFAULT_STORAGE_KEY).unwrap().unwrap();
        assert!(!raw.contains("contacts-secret-resource"));
        assert!(raw.contains("\"retentionDays\":2555"));

        let found = f.trail.query_logs(&AuditFilter::new()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].details.resource.as_deref(), Some("contacts-secret-resource"));
    }

    #[test]
    fn cleanup_removes_only_expired_entries() {
        let f = fixture();
        f.trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
        f.trail.log_action("note_saved", AuditCategory::Data, AuditDetails::success(), None, &[]);
        f.trail.flush().unwrap();

        f.clock.advance(Duration::days(366));
        assert_eq!(f.trail.cleanup_old_logs().unwrap(), Some(1));

        let left = f.trail.query_logs(&AuditFilter::new()).unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].action, "note_saved");
    }

    #[test]
    fn integrity_flags_duplicates_and_future_timestamps() {
        let f = fixture();
        let now = f.clock.now();
        let future = (now + Duration::days(1)).to_rfc3339();
        let log = serde_json::json!([
            {"id": "a", "timestamp": now.to_rfc3339(), "category": "user", "severity": "low",
             "retentionDays": 365, "encrypted": false, "sealed": {}},
            {"id": "a", "timestamp": future, "category": "user", "severity": "low",
             "retentionDays": 365, "encrypted": false, "sealed": {}},
            {"id": "b", "timestamp": "yesterday", "category": "user", "severity": "low",
             "encrypted": false, "sealed": {}}
        ]);
        f.store.set(DEFAULT_STORAGE_KEY, &log.to_string()).unwrap();

        let kinds: Vec<ViolationKind> = f.trail.verify_integrity().iter().map(|v| v.kind).collect();
        assert!(kinds.contains(&ViolationKind::DuplicateId));
        assert!(kinds.contains(&ViolationKind::FutureTimestamp));
        assert!(kinds.contains(&ViolationKind::InvalidTimestamp));
        assert!(kinds.contains(&ViolationKind::MissingField));
        assert!(matches!(
            f.trail.ensure_integrity(),
            Err(AuditError::IntegrityViolation { .. })
        ));
    }

    #[test]
    fn clean_log_passes_integrity() {
        let f = fixture();
        f.trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
        f.trail.log_auth("login", Some("u1"), true);
        f.trail.flush().unwrap();
        assert!(f.trail.verify_integrity().is_empty());
        f.trail.ensure_integrity().unwrap();
    }
}
