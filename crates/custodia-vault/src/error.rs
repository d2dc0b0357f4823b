//! Vault error types.
//!
//! [`VaultError::DecryptionFailed`] carries no detail: a wrong password and a
//! tampered envelope produce the same value.

/// Unified error type for the Custodia encryption vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    // -- Crypto errors ------------------------------------------------------
    /// Encryption failed (e.g. CSPRNG failure, ring internal error).
    #[error("encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Wrong password or modified envelope. Never distinguished.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Key derivation failed (e.g. empty password).
    #[error("key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    // -- Persistence errors -------------------------------------------------
    /// The backing key-value store rejected an operation.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// An invalid argument was supplied (e.g. an empty storage key).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // -- Underlying errors --------------------------------------------------
    #[error("sqlite error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("json error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error from the filesystem backend.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    // -- Generic ------------------------------------------------------------
    #[error("vault internal error: {0}")]
    Internal(String),
}

/// Result alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;
