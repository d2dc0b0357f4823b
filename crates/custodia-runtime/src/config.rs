//! Runtime configuration.
//!
//! Configuration comes from a TOML file (see `config/default.toml`) with one
//! table per service. Every field has a default, so a missing file, table or
//! key falls back silently. Environment variables, optionally loaded from a
//! `.env` file, override the file:
//!
//! | Variable | Effect |
//! |----------|--------|
//! | `CUSTODIA_PASSPHRASE` | vault passphrase |
//! | `CUSTODIA_DATA_DIR` | `vault.data_dir` |
//! | `CUSTODIA_LOG_LEVEL` | `logging.level` |

use std::path::{Path, PathBuf};
use std::time::Duration;

use custodia_audit::AuditSettings;
use custodia_auth::AuthSettings;
use custodia_privacy::PrivacySettings;
use serde::{Deserialize, Serialize};

use crate::error::{Result, RuntimeError};

pub const ENV_PASSPHRASE: &str = "CUSTODIA_PASSPHRASE";
pub const ENV_DATA_DIR: &str = "CUSTODIA_DATA_DIR";
pub const ENV_LOG_LEVEL: &str = "CUSTODIA_LOG_LEVEL";

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Which [`KeyValueStore`](custodia_vault::KeyValueStore) backs the services.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    File,
    #[default]
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub backend: StorageBackend,
    pub data_dir: PathBuf,
    /// PBKDF2 iterations for vault envelopes. Values below 100,000 are raised.
    pub pbkdf2_iterations: u32,
    /// Prefer `CUSTODIA_PASSPHRASE`; never serialized back out.
    #[serde(skip_serializing)]
    pub passphrase: Option<String>,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            data_dir: PathBuf::from("data"),
            pbkdf2_iterations: custodia_vault::crypto::MIN_PBKDF2_ITERATIONS,
            passphrase: None,
        }
    }
}

impl VaultConfig {
    /// SQLite database location inside the data directory.
    pub fn sqlite_path(&self) -> PathBuf {
        self.data_dir.join("custodia.db")
    }
}

/// Periods of the scheduled jobs, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub audit_flush_secs: u64,
    pub audit_cleanup_secs: u64,
    pub privacy_sweep_secs: u64,
    /// Delay before the first privacy sweep after start.
    pub privacy_sweep_initial_delay_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            audit_flush_secs: 30,
            audit_cleanup_secs: 24 * 60 * 60,
            privacy_sweep_secs: 60 * 60,
            privacy_sweep_initial_delay_secs: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn audit_flush(&self) -> Duration {
        Duration::from_secs(self.audit_flush_secs)
    }

    pub fn audit_cleanup(&self) -> Duration {
        Duration::from_secs(self.audit_cleanup_secs)
    }

    pub fn privacy_sweep(&self) -> Duration {
        Duration::from_secs(self.privacy_sweep_secs)
    }

    pub fn privacy_sweep_initial_delay(&self) -> Duration {
        Duration::from_secs(self.privacy_sweep_initial_delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Root
// ---------------------------------------------------------------------------

/// Complete runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CustodiaConfig {
    pub vault: VaultConfig,
    pub audit: AuditSettings,
    pub privacy: PrivacySettings,
    pub auth: AuthSettings,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl CustodiaConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read `path` as TOML. A missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).map_err(|source| RuntimeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Load `.env`, then the config file (if any), then apply environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match dotenvy::dotenv() {
            Ok(env_path) => tracing::debug!(path = %env_path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env"),
        }

        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Apply overrides from `lookup`, which maps a variable name to its
    /// value. Empty values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(passphrase) = get(ENV_PASSPHRASE) {
            self.vault.passphrase = Some(passphrase);
        }
        if let Some(dir) = get(ENV_DATA_DIR) {
            tracing::debug!(data_dir = %dir, "data directory overridden from environment");
            self.vault.data_dir = PathBuf::from(dir);
        }
        if let Some(level) = get(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
    }

    /// The vault passphrase.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::MissingPassphrase`] when neither the file nor the
    /// environment supplied one.
    pub fn passphrase(&self) -> Result<&str> {
        self.vault
            .passphrase
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or(RuntimeError::MissingPassphrase)
    }

    /// Reject settings the services cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.scheduler;
        for (name, secs) in [
            ("scheduler.audit_flush_secs", s.audit_flush_secs),
            ("scheduler.audit_cleanup_secs", s.audit_cleanup_secs),
            ("scheduler.privacy_sweep_secs", s.privacy_sweep_secs),
        ] {
            if secs == 0 {
                return Err(RuntimeError::InvalidConfig {
                    reason: format!("{name} must be greater than zero"),
                });
            }
        }
        if self.auth.rp_id.is_empty() {
            return Err(RuntimeError::InvalidConfig {
                reason: "auth.rp_id cannot be empty".into(),
            });
        }
        Ok(())
    }
}
