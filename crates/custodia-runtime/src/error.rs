//! Error types for the runtime crate.

use std::path::PathBuf;

/// Unified error type for building and running the Custodia services.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The configuration file could not be read.
    #[error("failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`CustodiaConfig`](crate::config::CustodiaConfig).
    #[error("invalid configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration is structurally valid but unusable.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// No vault passphrase was supplied by config or environment.
    #[error("no vault passphrase configured; set CUSTODIA_PASSPHRASE")]
    MissingPassphrase,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("vault error: {0}")]
    Vault(#[from] custodia_vault::VaultError),

    #[error("scheduler error: {0}")]
    Kernel(#[from] custodia_kernel::KernelError),

    #[error("audit error: {0}")]
    Audit(#[from] custodia_audit::AuditError),

    #[error("privacy error: {0}")]
    Privacy(#[from] custodia_privacy::PrivacyError),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, RuntimeError>;
