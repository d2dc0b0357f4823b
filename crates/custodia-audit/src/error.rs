//! Audit error types.

use custodia_vault::VaultError;

/// Errors surfaced by the audit trail.
///
/// Logging itself never fails; these are returned by queries, exports,
/// sweeps, and the integrity check.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// The persisted log failed its consistency check.
    #[error("audit integrity violation: {count} problem(s), first: {first}")]
    IntegrityViolation { count: usize, first: String },

    /// A caller-supplied argument was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Persistence or encryption failed underneath the trail.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// JSON (de)serialization of the persisted log failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the audit crate.
pub type Result<T> = std::result::Result<T, AuditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vault_errors_convert() {
        let err: AuditError = VaultError::DecryptionFailed.into();
        assert!(matches!(err, AuditError::Vault(_)));
        assert_eq!(err.to_string(), "vault error: decryption failed");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuditError>();
    }
}
