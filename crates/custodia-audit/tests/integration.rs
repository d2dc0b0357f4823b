//! Integration tests for the custodia-audit crate.
//!
//! These tests run the audit trail against real stores, including one that
//! fails on demand, and check persistence across restarts.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, TimeZone, Utc};
use custodia_audit::{
    AuditCategory, AuditDetails, AuditFilter, AuditSettings, AuditTrail, ExportFormat, Severity,
};
use custodia_kernel::{Clock, ManualClock, SessionId};
use custodia_vault::{CryptoVault, KeyValueStore, MemoryStore, SqliteStore, VaultError};

/// Memory store whose writes can be switched off.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl KeyValueStore for FlakyStore {
    fn get(&self, key: &str) -> custodia_vault::Result<Option<String>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> custodia_vault::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(VaultError::Storage {
                reason: "disk full".into(),
            });
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> custodia_vault::Result<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> custodia_vault::Result<Vec<String>> {
        self.inner.keys()
    }
}

fn trail_on(store: Arc<dyn KeyValueStore>, clock: Arc<ManualClock>) -> AuditTrail {
    let vault = Arc::new(CryptoVault::new(store, "integration-passphrase"));
    let settings = AuditSettings {
        utc_offset_minutes: Some(0),
        ..AuditSettings::default()
    };
    AuditTrail::new(vault, clock, SessionId::new(), settings)
}

fn noon() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 12, 0, 0).unwrap()))
}

// ═══════════════════════════════════════════════════════════════════════
//  Buffering and durability
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn failed_flush_rebuffers_entries() {
    let store = Arc::new(FlakyStore::default());
    let trail = trail_on(store.clone(), noon());

    trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
    trail.log_action("settings_open", AuditCategory::User, AuditDetails::success(), None, &[]);

    store.failing.store(true, Ordering::SeqCst);
    assert!(trail.flush().is_err());
    assert_eq!(trail.buffered_len(), 2);

    // An immediate flush attempt on a critical event also fails and keeps all three.
    trail.log_auth("failed_login", Some("u1"), false);
    assert_eq!(trail.buffered_len(), 3);

    store.failing.store(false, Ordering::SeqCst);
    assert_eq!(trail.flush().unwrap(), 3);
    assert_eq!(trail.buffered_len(), 0);

    let actions: Vec<String> = trail
        .query_logs(&AuditFilter::new())
        .unwrap()
        .into_iter()
        .map(|e| e.action)
        .collect();
    assert_eq!(actions.len(), 3);
    assert!(actions.contains(&"failed_login".to_string()));
}

#[test]
fn entries_survive_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("audit.db");
    let clock = noon();

    let first_id = {
        let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
        let trail = trail_on(store, clock.clone());
        let entry = trail.log_auth("login", Some("alice"), true);
        trail.log_data_access("email_read", "inbox/42", Some("alice"));
        trail.close().unwrap();
        entry.id
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(SqliteStore::open(&path).unwrap());
    let trail = trail_on(store, clock);
    let found = trail.query_logs(&AuditFilter::new().user("alice")).unwrap();
    assert_eq!(found.len(), 2);

    let login = found.iter().find(|e| e.id == first_id).unwrap();
    assert!(login.encrypted);
    assert_eq!(login.severity, Severity::High);
}

#[test]
fn stored_entries_are_never_altered() {
    let clock = noon();
    let trail = trail_on(Arc::new(MemoryStore::new()), clock.clone());

    let original = trail.log_action(
        "note_saved",
        AuditCategory::Data,
        AuditDetails::success().with_resource("notes/1").with_duration_ms(12),
        Some("bob"),
        &["notes"],
    );
    trail.flush().unwrap();

    clock.advance(Duration::days(10));
    trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
    trail.flush().unwrap();
    trail.cleanup_old_logs().unwrap();

    let found = trail
        .query_logs(&AuditFilter::new().action_contains("note"))
        .unwrap();
    assert_eq!(found, vec![original]);
}

#[test]
fn corrupt_log_is_set_aside_and_logging_continues() {
    let clock = noon();
    let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
    store.set("audit_logs", "{not json").unwrap();
    let trail = trail_on(Arc::clone(&store), clock.clone());

    for n in 0..3 {
        trail.log_action(&format!("page_view_{n}"), AuditCategory::User, AuditDetails::success(), None, &[]);
        assert_eq!(trail.flush().unwrap(), 1);
        assert_eq!(trail.buffered_len(), 0);
    }

    let entries = trail.query_logs(&AuditFilter::new()).unwrap();
    assert_eq!(entries.len(), 3);

    let quarantined = format!("audit_logs.corrupt.{}", clock.now().timestamp_millis());
    assert_eq!(store.get(&quarantined).unwrap().as_deref(), Some("{not json"));
}

// ═══════════════════════════════════════════════════════════════════════
//  Retention
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn security_entries_outlive_ordinary_ones() {
    let clock = noon();
    let trail = trail_on(Arc::new(MemoryStore::new()), clock.clone());

    trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
    trail.log_action("token_refresh", AuditCategory::Auth, AuditDetails::success(), None, &[]);
    trail.log_security_event("firewall_check", AuditDetails::success());
    trail.flush().unwrap();

    clock.advance(Duration::days(1100));
    assert_eq!(trail.cleanup_old_logs().unwrap(), Some(2));

    let left = trail.query_logs(&AuditFilter::new()).unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].category, AuditCategory::Security);
    assert_eq!(left[0].retention_days, 2555);
}

// ═══════════════════════════════════════════════════════════════════════
//  Reports and export
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn report_window_and_anomalies() {
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 3, 30, 0).unwrap()));
    let trail = trail_on(Arc::new(MemoryStore::new()), clock.clone());

    trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);
    clock.advance(Duration::hours(8));
    trail.log_auth("failed_login", Some("mallory"), false);
    trail.log_action("page_view", AuditCategory::User, AuditDetails::success(), None, &[]);

    let everything = trail.generate_report(None, None).unwrap();
    assert_eq!(everything.total_events, 3);
    assert_eq!(everything.anomalies.len(), 2);
    assert_eq!(everything.hourly[3], 1);
    assert_eq!(everything.hourly[11], 2);

    let later = trail
        .generate_report(Some(Utc.with_ymd_and_hms(2026, 5, 4, 10, 0, 0).unwrap()), None)
        .unwrap();
    assert_eq!(later.total_events, 2);
    assert_eq!(later.anomalies.len(), 1);
    assert_eq!(later.by_category["auth"], 1);
}

#[test]
fn csv_export_respects_filter() {
    let trail = trail_on(Arc::new(MemoryStore::new()), noon());
    trail.log_data_access("email_read", "inbox/1", Some("alice"));
    trail.log_data_access("email_read", "inbox/2", Some("bob"));

    let csv = trail
        .export_logs(ExportFormat::Csv, &AuditFilter::new().user("bob"))
        .unwrap();
    let lines: Vec<&str> = csv.lines().collect();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].contains("inbox/2"));
    assert!(!csv.contains("alice"));
}
