//! The service container.
//!
//! [`Runtime`] owns one instance of each service, all sharing the same vault,
//! clock and session, plus the scheduler that drives their periodic jobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use custodia_audit::{AuditCategory, AuditDetails, AuditTrail};
use custodia_auth::{CredentialAuthority, CredentialPlatform};
use custodia_kernel::{Scheduler, SessionId, SharedClock, SystemClock, TaskInfo, job};
use custodia_privacy::{ConsentPrompt, PrivacyGovernor};
use custodia_vault::{CryptoVault, EncryptOptions, FileStore, KeyValueStore, MemoryStore, SqliteStore};

use crate::config::{CustodiaConfig, StorageBackend, VaultConfig};
use crate::error::{Result, RuntimeError};

/// Task names registered by [`Runtime::start`].
pub const AUDIT_FLUSH_TASK: &str = "audit-flush";
pub const AUDIT_CLEANUP_TASK: &str = "audit-cleanup";
pub const PRIVACY_SWEEP_TASK: &str = "privacy-sweep";

pub struct Runtime {
    config: CustodiaConfig,
    config_path: Option<PathBuf>,
    clock: SharedClock,
    session_id: SessionId,
    vault: Arc<CryptoVault>,
    audit: Arc<AuditTrail>,
    privacy: Arc<PrivacyGovernor>,
    auth: Arc<CredentialAuthority>,
    scheduler: Scheduler,
    started: AtomicBool,
}

impl Runtime {
    /// Build every service from `config` on the system clock.
    ///
    /// Nothing runs until [`Runtime::start`].
    pub fn build(
        config: CustodiaConfig,
        platform: Arc<dyn CredentialPlatform>,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Result<Self> {
        Self::build_with_clock(config, platform, prompt, SystemClock::shared())
    }

    pub fn build_with_clock(
        config: CustodiaConfig,
        platform: Arc<dyn CredentialPlatform>,
        prompt: Arc<dyn ConsentPrompt>,
        clock: SharedClock,
    ) -> Result<Self> {
        config.validate()?;
        let passphrase = config.passphrase()?;

        let store = open_store(&config.vault)?;
        let vault = Arc::new(
            CryptoVault::new(store, passphrase).with_options(EncryptOptions {
                iterations: config.vault.pbkdf2_iterations,
            }),
        );

        let session_id = SessionId::new();
        let audit = Arc::new(AuditTrail::new(
            Arc::clone(&vault),
            Arc::clone(&clock),
            session_id,
            config.audit.clone(),
        ));
        let privacy = Arc::new(PrivacyGovernor::new(
            Arc::clone(&vault),
            Arc::clone(&clock),
            config.privacy.clone(),
            prompt,
        ));
        let auth = Arc::new(CredentialAuthority::new(
            platform,
            Arc::clone(&vault),
            Arc::clone(&clock),
            config.auth.clone(),
        ));

        tracing::info!(
            session_id = %session_id,
            backend = ?config.vault.backend,
            data_dir = %config.vault.data_dir.display(),
            "custodia runtime built"
        );

        Ok(Self {
            config,
            config_path: None,
            clock,
            session_id,
            vault,
            audit,
            privacy,
            auth,
            scheduler: Scheduler::new(),
            started: AtomicBool::new(false),
        })
    }

    /// Load configuration from `path` (plus `.env` and environment
    /// overrides) and build. The path is kept for
    /// [`Runtime::reload_privacy_settings`].
    pub fn load(
        path: impl AsRef<Path>,
        platform: Arc<dyn CredentialPlatform>,
        prompt: Arc<dyn ConsentPrompt>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let config = CustodiaConfig::load(Some(path))?;
        let mut runtime = Self::build(config, platform, prompt)?;
        runtime.config_path = Some(path.to_path_buf());
        Ok(runtime)
    }

    // -- Accessors ----------------------------------------------------------

    pub fn config(&self) -> &CustodiaConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn vault(&self) -> &Arc<CryptoVault> {
        &self.vault
    }

    pub fn audit(&self) -> &Arc<AuditTrail> {
        &self.audit
    }

    pub fn privacy(&self) -> &Arc<PrivacyGovernor> {
        &self.privacy
    }

    pub fn auth(&self) -> &Arc<CredentialAuthority> {
        &self.auth
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Registered periodic tasks, ordered by name.
    pub fn tasks(&self) -> Vec<TaskInfo> {
        let mut tasks: Vec<TaskInfo> = self.scheduler.all_tasks().into_values().collect();
        tasks.sort_by(|a, b| a.name.cmp(&b.name));
        tasks
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Register the periodic jobs and start the scheduler.
    ///
    /// Must be called from within a tokio runtime. Calling it again is a
    /// no-op.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let intervals = &self.config.scheduler;

        let audit = Arc::clone(&self.audit);
        self.scheduler.schedule_periodic(
            AUDIT_FLUSH_TASK,
            intervals.audit_flush(),
            intervals.audit_flush(),
            job(move || {
                let audit = Arc::clone(&audit);
                async move {
                    let written = run_blocking(move || audit.flush()).await?;
                    if written > 0 {
                        tracing::trace!(written, "periodic audit flush");
                    }
                    Ok(())
                }
            }),
        )?;

        let audit = Arc::clone(&self.audit);
        self.scheduler.schedule_periodic(
            AUDIT_CLEANUP_TASK,
            intervals.audit_cleanup(),
            intervals.audit_cleanup(),
            job(move || {
                let audit = Arc::clone(&audit);
                async move {
                    match run_blocking(move || audit.cleanup_old_logs()).await? {
                        Some(removed) => tracing::info!(removed, "audit retention sweep finished"),
                        None => tracing::debug!("audit retention sweep already running"),
                    }
                    Ok(())
                }
            }),
        )?;

        let privacy = Arc::clone(&self.privacy);
        let audit = Arc::clone(&self.audit);
        self.scheduler.schedule_periodic(
            PRIVACY_SWEEP_TASK,
            intervals.privacy_sweep(),
            intervals.privacy_sweep_initial_delay(),
            job(move || {
                let privacy = Arc::clone(&privacy);
                let audit = Arc::clone(&audit);
                async move {
                    let Some(report) = run_blocking(move || privacy.cleanup_expired_data()).await?
                    else {
                        tracing::debug!("privacy sweep already running");
                        return Ok(());
                    };
                    if report.deleted > 0 || report.anonymized > 0 {
                        audit.log_privacy_event(
                            "retention_sweep",
                            AuditDetails::success()
                                .with_extra("deleted", report.deleted.into())
                                .with_extra("anonymized", report.anonymized.into()),
                            None,
                        );
                    }
                    Ok(())
                }
            }),
        )?;

        self.scheduler.start()?;
        self.audit.log_action(
            "session_start",
            AuditCategory::System,
            AuditDetails::success(),
            None,
            &["lifecycle"],
        );
        tracing::info!(session_id = %self.session_id, "custodia runtime started");
        Ok(())
    }

    /// Stop the scheduler and flush whatever the audit trail still buffers.
    pub fn shutdown(&self) -> Result<()> {
        if !self.scheduler.is_shut_down() {
            self.scheduler.shutdown();
            if self.is_started() {
                self.audit.log_action(
                    "session_end",
                    AuditCategory::System,
                    AuditDetails::success(),
                    None,
                    &["lifecycle"],
                );
            }
        }
        self.audit.close()?;
        tracing::info!(session_id = %self.session_id, "custodia runtime stopped");
        Ok(())
    }

    /// Re-read the config file and swap in its `[privacy]` table.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::InvalidConfig`] when the runtime was not built from a
    /// file, or any read/parse error. The active settings are unchanged on
    /// error.
    pub fn reload_privacy_settings(&self) -> Result<()> {
        let path = self.config_path.as_deref().ok_or_else(|| RuntimeError::InvalidConfig {
            reason: "runtime was not loaded from a config file".into(),
        })?;
        let config = CustodiaConfig::from_file(path)?;
        self.privacy.reload_settings(config.privacy);
        tracing::info!(path = %path.display(), "privacy settings reloaded");
        Ok(())
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("session_id", &self.session_id)
            .field("backend", &self.config.vault.backend)
            .field("started", &self.is_started())
            .finish_non_exhaustive()
    }
}

fn open_store(config: &VaultConfig) -> Result<Arc<dyn KeyValueStore>> {
    let store: Arc<dyn KeyValueStore> = match config.backend {
        StorageBackend::Memory => Arc::new(MemoryStore::new()),
        StorageBackend::File => {
            std::fs::create_dir_all(&config.data_dir)?;
            Arc::new(FileStore::open(FileStore::default_path(&config.data_dir))?)
        }
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(&config.data_dir)?;
            Arc::new(SqliteStore::open(config.sqlite_path())?)
        }
    };
    Ok(store)
}

/// Run synchronous service work off the async workers.
async fn run_blocking<T, E>(
    f: impl FnOnce() -> std::result::Result<T, E> + Send + 'static,
) -> std::result::Result<T, String>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result.map_err(|e| e.to_string()),
        Err(e) => Err(format!("job panicked: {e}")),
    }
}
