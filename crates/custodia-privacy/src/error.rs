//! Privacy governor error types.

use custodia_vault::VaultError;

/// Errors surfaced by the privacy governor.
#[derive(Debug, thiserror::Error)]
pub enum PrivacyError {
    /// The user declined, or did not answer, a consent prompt.
    #[error("consent denied for {data_type} ({purpose})")]
    ConsentDenied { data_type: String, purpose: String },

    /// No item with the given id is stored.
    #[error("data item not found: {id}")]
    NotFound { id: String },

    /// A caller-supplied argument was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Settings could not be parsed.
    #[error("invalid privacy settings: {0}")]
    InvalidSettings(#[from] toml::de::Error),

    /// Persistence or encryption failed underneath the governor.
    #[error("vault error: {0}")]
    Vault(#[from] VaultError),

    /// JSON (de)serialization of an item or the index failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the privacy crate.
pub type Result<T> = std::result::Result<T, PrivacyError>;
