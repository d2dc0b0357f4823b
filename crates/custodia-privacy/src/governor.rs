//! The privacy governor service.
//!
//! [`PrivacyGovernor`] classifies incoming data against the ordered
//! [`RuleTable`], stores each item encrypted or in clear depending on the
//! matching rule, and keeps a small unencrypted index so retention sweeps
//! and reports never have to decrypt item bodies.
//!
//! Storage layout in the shared [`KeyValueStore`]:
//!
//! | Key | Contents |
//! |-----|----------|
//! | `privacy:index` | JSON array of [`IndexEntry`] |
//! | `privacy:data:{id}` | plain JSON [`DataItem`] |
//! | vault item `privacy:data:{id}` | sealed [`DataItem`] |
//!
//! [`KeyValueStore`]: custodia_vault::KeyValueStore

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Duration, Utc};
use custodia_kernel::{InFlight, SharedClock};
use custodia_vault::CryptoVault;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::anonymize::Anonymizer;
use crate::classify::{Classification, RuleTable, Sensitivity, scan_text};
use crate::consent::{ConsentOutcome, ConsentPrompt, ConsentRecord, ConsentRequest};
use crate::error::{PrivacyError, Result};
use crate::settings::PrivacySettings;
use crate::tags::TagExtractor;

/// Store key of the unencrypted index.
pub const INDEX_KEY: &str = "privacy:index";

/// Key prefix shared by plain and encrypted item bodies.
pub const DATA_PREFIX: &str = "privacy:data:";

/// Items expiring within this many days are flagged by the report.
const EXPIRY_WARNING_DAYS: i64 = 7;

// ---------------------------------------------------------------------------
// Data model
// ---------------------------------------------------------------------------

/// A governed piece of user data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataItem {
    pub id: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub data: Value,
    pub sensitivity: Sensitivity,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
    /// Retention in days. `0` makes the item eligible for the next sweep.
    pub retention_period: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    pub encrypted: bool,
    #[serde(default)]
    pub anonymized: bool,
    pub source: String,
    pub user_consent: bool,
}

/// Sweep-relevant metadata of one item, kept in clear.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    pub id: String,
    #[serde(rename = "type")]
    pub data_type: String,
    pub sensitivity: Sensitivity,
    pub created_at: DateTime<Utc>,
    pub retention_period: u32,
    pub anonymized: bool,
    #[serde(default)]
    pub encrypted: bool,
}

impl IndexEntry {
    fn of(item: &DataItem) -> Self {
        Self {
            id: item.id.clone(),
            data_type: item.data_type.clone(),
            sensitivity: item.sensitivity,
            created_at: item.created_at,
            retention_period: item.retention_period,
            anonymized: item.anonymized,
            encrypted: item.encrypted,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at + Duration::days(i64::from(self.retention_period))
    }
}

/// Arguments to [`PrivacyGovernor::store_data`].
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub id: String,
    pub data: Value,
    pub data_type: String,
    pub source: String,
    pub user_consent: bool,
    /// Overrides every other retention source when set.
    pub custom_retention: Option<u32>,
}

impl StoreRequest {
    pub fn new(id: impl Into<String>, data: impl Into<Value>, data_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: data.into(),
            data_type: data_type.into(),
            source: "user".to_string(),
            user_consent: false,
            custom_retention: None,
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_consent(mut self, consent: bool) -> Self {
        self.user_consent = consent;
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.custom_retention = Some(days);
        self
    }
}

/// Outcome of one retention sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub deleted: usize,
    pub anonymized: usize,
}

/// Points at one item by id and creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemPointer {
    pub id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrivacyReport {
    pub generated_at: DateTime<Utc>,
    pub total_items: usize,
    pub by_type: BTreeMap<String, usize>,
    pub by_sensitivity: BTreeMap<String, usize>,
    pub encrypted_items: usize,
    pub anonymized_items: usize,
    /// Ids whose retention ends within seven days, overdue ones included.
    pub expiring_soon: Vec<String>,
    pub oldest_item: Option<ItemPointer>,
    pub newest_item: Option<ItemPointer>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// In-memory copy of `privacy:index`, loaded on first use.
#[derive(Default)]
struct IndexState {
    loaded: bool,
    entries: BTreeMap<String, IndexEntry>,
}

/// Classifies, stores, sweeps and anonymizes user data.
pub struct PrivacyGovernor {
    vault: Arc<CryptoVault>,
    clock: SharedClock,
    rules: RuleTable,
    tagger: TagExtractor,
    anonymizer: Anonymizer,
    settings: RwLock<Arc<PrivacySettings>>,
    prompt: Arc<dyn ConsentPrompt>,
    index: Mutex<IndexState>,
    consents: Mutex<Vec<ConsentRecord>>,
    sweep_in_flight: InFlight,
}

impl PrivacyGovernor {
    pub fn new(
        vault: Arc<CryptoVault>,
        clock: SharedClock,
        settings: PrivacySettings,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Self {
        Self::with_rules(vault, clock, settings, prompt, RuleTable::builtin())
    }

    /// Use a custom classification table instead of the built-in one.
    pub fn with_rules(
        vault: Arc<CryptoVault>,
        clock: SharedClock,
        settings: PrivacySettings,
        prompt: Arc<dyn ConsentPrompt>,
        rules: RuleTable,
    ) -> Self {
        tracing::info!(rules = rules.rules().len(), "privacy governor initialised");
        Self {
            vault,
            clock,
            rules,
            tagger: TagExtractor::new(),
            anonymizer: Anonymizer::new(),
            settings: RwLock::new(Arc::new(settings)),
            prompt,
            index: Mutex::new(IndexState::default()),
            consents: Mutex::new(Vec::new()),
            sweep_in_flight: InFlight::new(),
        }
    }

    // -- Settings -----------------------------------------------------------

    /// Snapshot of the active settings.
    pub fn settings(&self) -> Arc<PrivacySettings> {
        Arc::clone(&self.settings.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Swap in new settings. In-progress operations keep their snapshot.
    pub fn reload_settings(&self, settings: PrivacySettings) {
        *self.settings.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(settings);
        tracing::info!("privacy settings reloaded");
    }

    /// Parse `text` as a `[privacy]` table and swap it in. On a parse error
    /// the active settings are left untouched.
    pub fn reload_from_toml(&self, text: &str) -> Result<()> {
        let settings = PrivacySettings::from_toml(text)?;
        self.reload_settings(settings);
        Ok(())
    }

    // -- Classification -----------------------------------------------------

    /// Classify `data` declared as `data_type`.
    ///
    /// The rule table decides first. When no rule matches, the settings'
    /// sensitivity keywords may raise the sensitivity; a `high` or
    /// `critical` keyword also requires encryption.
    pub fn classify_data(&self, data: &Value, data_type: &str) -> Classification {
        let text = scan_text(data);
        self.classify_text(&text, data_type, &self.settings())
    }

    fn classify_text(&self, text: &str, data_type: &str, settings: &PrivacySettings) -> Classification {
        let mut classification = self.rules.classify_text(text, data_type);
        if classification.rule.is_some() {
            return classification;
        }

        let lowered = text.to_lowercase();
        let hit = settings.keyword_levels().into_iter().find(|(_, words)| {
            words
                .iter()
                .any(|w| !w.is_empty() && lowered.contains(&w.to_lowercase()))
        });
        if let Some((level, _)) = hit {
            classification.sensitivity = level;
            classification.requires_encryption = level >= Sensitivity::High;
        }
        classification
    }

    // -- Item lifecycle -----------------------------------------------------

    /// Classify, tag and persist one item, replacing any item with the same id.
    ///
    /// Retention resolves as custom > matching rule > per-type default > 30.
    ///
    /// # Errors
    ///
    /// [`PrivacyError::ConsentDenied`] when sensitive data arrives without
    /// consent and the settings require it; [`PrivacyError::InvalidInput`]
    /// for an empty id; storage errors otherwise.
    pub fn store_data(&self, request: StoreRequest) -> Result<DataItem> {
        if request.id.trim().is_empty() {
            return Err(PrivacyError::InvalidInput("item id cannot be empty".into()));
        }

        let settings = self.settings();
        let text = scan_text(&request.data);
        let classification = self.classify_text(&text, &request.data_type, &settings);

        if settings.consent.require_consent_for_sensitive
            && classification.sensitivity >= Sensitivity::High
            && !request.user_consent
        {
            tracing::warn!(id = %request.id, data_type = %request.data_type, "sensitive item refused without consent");
            return Err(PrivacyError::ConsentDenied {
                data_type: request.data_type,
                purpose: "storage".to_string(),
            });
        }

        let retention_period = request
            .custom_retention
            .or(classification.rule.is_some().then_some(classification.retention_days))
            .unwrap_or_else(|| settings.retention_for_type(&request.data_type));

        let item = DataItem {
            id: request.id,
            data_type: request.data_type,
            tags: self.tagger.extract(&text),
            data: request.data,
            sensitivity: classification.sensitivity,
            created_at: self.clock.now(),
            last_accessed: None,
            retention_period,
            encrypted: classification.requires_encryption,
            anonymized: false,
            source: request.source,
            user_consent: request.user_consent,
        };

        self.write_item(&item)?;
        self.update_index(|index| {
            index.insert(item.id.clone(), IndexEntry::of(&item));
        })?;

        tracing::info!(
            id = %item.id,
            data_type = %item.data_type,
            detected = %classification.data_type,
            sensitivity = item.sensitivity.as_str(),
            retention_days = item.retention_period,
            encrypted = item.encrypted,
            "stored data item"
        );
        Ok(item)
    }

    /// Load an item and record the access time.
    ///
    /// Encrypted storage is consulted first, then plain storage. Missing and
    /// unreadable items both yield `None`.
    pub fn retrieve_data(&self, id: &str) -> Option<DataItem> {
        let mut item = self.load_item(id)?;
        item.last_accessed = Some(self.clock.now());
        if let Err(e) = self.write_item(&item) {
            tracing::warn!(id = %id, error = %e, "failed to persist access time");
        }
        Some(item)
    }

    /// Remove an item body and its index entry. Returns whether the item was
    /// indexed.
    pub fn delete_data(&self, id: &str) -> Result<bool> {
        self.remove_bodies(id)?;
        let mut was_indexed = false;
        self.update_index(|index| {
            was_indexed = index.remove(id).is_some();
        })?;
        tracing::info!(id = %id, "deleted data item");
        Ok(was_indexed)
    }

    /// Reduce an item to its anonymized form.
    ///
    /// Returns `Ok(false)` when it was already anonymized.
    ///
    /// # Errors
    ///
    /// [`PrivacyError::NotFound`] when the item is missing or unreadable.
    pub fn anonymize_data(&self, id: &str) -> Result<bool> {
        let mut item = self.load_item(id).ok_or_else(|| PrivacyError::NotFound { id: id.to_string() })?;
        if item.anonymized {
            return Ok(false);
        }

        item.data = self
            .anonymizer
            .summarize(&item.data_type, &item.data, item.created_at);
        item.anonymized = true;
        self.write_item(&item)?;
        self.update_index(|index| {
            index.insert(item.id.clone(), IndexEntry::of(&item));
        })?;

        tracing::info!(id = %id, data_type = %item.data_type, "anonymized data item");
        Ok(true)
    }

    /// Delete expired items and anonymize over-age ones.
    ///
    /// Returns `Ok(None)` without doing anything when a sweep is already
    /// running. Per-item failures are logged and skipped.
    pub fn cleanup_expired_data(&self) -> Result<Option<CleanupReport>> {
        let Some(_guard) = self.sweep_in_flight.try_enter() else {
            tracing::debug!("privacy sweep already running; skipping");
            return Ok(None);
        };

        let settings = self.settings();
        let now = self.clock.now();
        let anonymize_after = Duration::days(i64::from(settings.anonymization.after_days));
        let entries: Vec<IndexEntry> = self.index_guard()?.entries.values().cloned().collect();

        let mut report = CleanupReport::default();
        for entry in entries {
            let age = now - entry.created_at;
            if age > Duration::days(i64::from(entry.retention_period)) {
                match self.delete_data(&entry.id) {
                    Ok(_) => report.deleted += 1,
                    Err(e) => tracing::warn!(id = %entry.id, error = %e, "failed to delete expired item"),
                }
            } else if settings.anonymization.enabled && !entry.anonymized && age > anonymize_after {
                match self.anonymize_data(&entry.id) {
                    Ok(true) => report.anonymized += 1,
                    Ok(false) => {}
                    Err(e) => tracing::warn!(id = %entry.id, error = %e, "failed to anonymize item"),
                }
            }
        }

        tracing::info!(deleted = report.deleted, anonymized = report.anonymized, "privacy sweep complete");
        Ok(Some(report))
    }

    // -- Consent ------------------------------------------------------------

    /// Ask the user for consent, waiting at most the configured timeout.
    ///
    /// An unanswered prompt is denied. Every decision is recorded.
    pub async fn request_consent(&self, data_type: &str, purpose: &str) -> bool {
        let request = ConsentRequest {
            data_type: data_type.to_string(),
            purpose: purpose.to_string(),
        };
        let timeout = self.settings().consent_timeout();

        let outcome = match tokio::time::timeout(timeout, self.prompt.ask(&request)).await {
            Ok(true) => ConsentOutcome::Granted,
            Ok(false) => ConsentOutcome::Denied,
            Err(_) => ConsentOutcome::TimedOut,
        };

        tracing::info!(data_type = %data_type, purpose = %purpose, outcome = ?outcome, "consent decided");
        self.consents
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(ConsentRecord {
                data_type: request.data_type,
                purpose: request.purpose,
                outcome,
                decided_at: self.clock.now(),
            });
        outcome.is_granted()
    }

    /// [`request_consent`](Self::request_consent), failing on denial.
    pub async fn require_consent(&self, data_type: &str, purpose: &str) -> Result<()> {
        if self.request_consent(data_type, purpose).await {
            Ok(())
        } else {
            Err(PrivacyError::ConsentDenied {
                data_type: data_type.to_string(),
                purpose: purpose.to_string(),
            })
        }
    }

    /// Consent decisions recorded in this process, oldest first.
    pub fn consent_history(&self) -> Vec<ConsentRecord> {
        self.consents.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    // -- Reporting and bulk operations --------------------------------------

    pub fn get_privacy_report(&self) -> Result<PrivacyReport> {
        let now = self.clock.now();
        let warn_before = now + Duration::days(EXPIRY_WARNING_DAYS);
        let guard = self.index_guard()?;
        let index = &guard.entries;

        let mut report = PrivacyReport {
            generated_at: now,
            total_items: index.len(),
            by_type: BTreeMap::new(),
            by_sensitivity: BTreeMap::new(),
            encrypted_items: 0,
            anonymized_items: 0,
            expiring_soon: Vec::new(),
            oldest_item: None,
            newest_item: None,
        };

        for entry in index.values() {
            *report.by_type.entry(entry.data_type.clone()).or_default() += 1;
            *report
                .by_sensitivity
                .entry(entry.sensitivity.as_str().to_string())
                .or_default() += 1;
            report.encrypted_items += usize::from(entry.encrypted);
            report.anonymized_items += usize::from(entry.anonymized);
            if entry.expires_at() <= warn_before {
                report.expiring_soon.push(entry.id.clone());
            }
        }

        let pointer = |e: &IndexEntry| ItemPointer {
            id: e.id.clone(),
            created_at: e.created_at,
        };
        report.oldest_item = index.values().min_by_key(|e| e.created_at).map(pointer);
        report.newest_item = index.values().max_by_key(|e| e.created_at).map(pointer);
        Ok(report)
    }

    /// Index entries, oldest first.
    pub fn list_items(&self) -> Result<Vec<IndexEntry>> {
        let mut entries: Vec<IndexEntry> = self.index_guard()?.entries.values().cloned().collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }

    /// Every readable item, oldest first, for a portable data export.
    /// Access times are not touched.
    pub fn export_all_data(&self) -> Result<Vec<DataItem>> {
        let items = self
            .list_items()?
            .into_iter()
            .filter_map(|entry| {
                let item = self.load_item(&entry.id);
                if item.is_none() {
                    tracing::warn!(id = %entry.id, "skipping unreadable item in export");
                }
                item
            })
            .collect();
        Ok(items)
    }

    /// Erase every governed item and the index. Returns the number of
    /// indexed items removed.
    pub fn purge_all(&self) -> Result<usize> {
        let mut guard = self.index_guard()?;
        let count = guard.entries.len();

        let store = self.vault.store();
        for key in store.keys()? {
            if key.starts_with(DATA_PREFIX) {
                store.remove(&key)?;
            }
        }
        for key in self.vault.keys_with_prefix(DATA_PREFIX)? {
            self.vault.remove_item(&key)?;
        }
        store.remove(INDEX_KEY)?;
        guard.entries.clear();

        tracing::warn!(items = count, "purged all governed data");
        Ok(count)
    }

    // -- Internals ----------------------------------------------------------

    fn load_item(&self, id: &str) -> Option<DataItem> {
        let key = data_key(id);
        if let Some(item) = self.vault.get_item::<DataItem>(&key) {
            return Some(item);
        }

        let raw = match self.vault.store().get(&key) {
            Ok(raw) => raw?,
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "failed to read data item");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(item) => Some(item),
            Err(e) => {
                tracing::warn!(id = %id, error = %e, "discarding unreadable data item");
                None
            }
        }
    }

    fn write_item(&self, item: &DataItem) -> Result<()> {
        let key = data_key(&item.id);
        let store = self.vault.store();
        if item.encrypted {
            self.vault.set_item(&key, item)?;
            store.remove(&key)?;
        } else {
            store.set(&key, &serde_json::to_string(item)?)?;
            self.vault.remove_item(&key)?;
        }
        Ok(())
    }

    fn remove_bodies(&self, id: &str) -> Result<()> {
        let key = data_key(id);
        self.vault.remove_item(&key)?;
        self.vault.store().remove(&key)?;
        Ok(())
    }

    /// Lock the index, loading it on first use.
    fn index_guard(&self) -> Result<MutexGuard<'_, IndexState>> {
        let mut guard = self.index.lock().unwrap_or_else(|e| e.into_inner());
        if !guard.loaded {
            guard.entries = self.load_index()?;
            guard.loaded = true;
        }
        Ok(guard)
    }

    fn update_index(&self, f: impl FnOnce(&mut BTreeMap<String, IndexEntry>)) -> Result<()> {
        let mut guard = self.index_guard()?;
        f(&mut guard.entries);
        let entries: Vec<&IndexEntry> = guard.entries.values().collect();
        self.vault
            .store()
            .set(INDEX_KEY, &serde_json::to_string(&entries)?)?;
        Ok(())
    }

    fn load_index(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let Some(raw) = self.vault.store().get(INDEX_KEY)? else {
            return Ok(BTreeMap::new());
        };
        match serde_json::from_str::<Vec<IndexEntry>>(&raw) {
            Ok(entries) => Ok(entries.into_iter().map(|e| (e.id.clone(), e)).collect()),
            Err(e) => {
                tracing::error!(error = %e, "privacy index unreadable; rebuilding from items");
                self.rebuild_index()
            }
        }
    }

    /// Reconstruct the index from stored item bodies.
    fn rebuild_index(&self) -> Result<BTreeMap<String, IndexEntry>> {
        let mut ids: Vec<String> = self
            .vault
            .store()
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(DATA_PREFIX).map(str::to_string))
            .collect();
        ids.extend(
            self.vault
                .keys_with_prefix(DATA_PREFIX)?
                .into_iter()
                .filter_map(|k| k.strip_prefix(DATA_PREFIX).map(str::to_string)),
        );

        let index: BTreeMap<String, IndexEntry> = ids
            .iter()
            .filter_map(|id| self.load_item(id))
            .map(|item| (item.id.clone(), IndexEntry::of(&item)))
            .collect();
        tracing::info!(items = index.len(), "privacy index rebuilt");
        Ok(index)
    }
}

fn data_key(id: &str) -> String {
    format!("{DATA_PREFIX}{id}")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
