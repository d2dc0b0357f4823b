//! Error types for the credential authority.
//!
//! Ceremony outcomes that the user causes (cancelling a prompt, presenting an
//! unknown credential) are reported through
//! [`AuthenticationResult`](crate::authority::AuthenticationResult) by
//! `authenticate`; every other operation surfaces [`AuthError`].

/// Unified error type for the credential authority.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The platform offers no credential ceremony of the requested kind.
    #[error("not supported: {capability}")]
    NotSupported {
        /// What was probed for.
        capability: String,
    },

    /// The user dismissed the prompt, the platform refused, or the timeout
    /// elapsed.
    #[error("ceremony cancelled: {reason}")]
    CeremonyCancelled { reason: String },

    /// No stored credential matches.
    #[error("credential not found: {id}")]
    CredentialNotFound { id: String },

    /// The platform response did not verify (challenge, origin, signature).
    #[error("verification failed: {reason}")]
    VerificationFailed { reason: String },

    /// A management operation needs a recent successful authentication.
    #[error("re-authentication required")]
    ReauthenticationRequired,

    /// PIN authentication was attempted before a PIN was set.
    #[error("no PIN has been set up")]
    PinNotSet,

    /// The stored credential list exists but cannot be decrypted or parsed.
    /// It is left untouched so a later unlock with the right passphrase can
    /// still read it.
    #[error("stored credentials are unreadable")]
    CredentialStoreUnreadable,

    /// A caller-supplied argument was rejected.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The platform failed for a reason other than cancellation.
    #[error("platform error: {0}")]
    Platform(String),

    /// Randomness or key derivation failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// An error propagated from the vault crate.
    #[error("vault error: {0}")]
    Vault(#[from] custodia_vault::VaultError),

    /// JSON serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_not_supported() {
        let err = AuthError::NotSupported {
            capability: "platform authenticator".to_string(),
        };
        assert_eq!(err.to_string(), "not supported: platform authenticator");
    }

    #[test]
    fn error_display_cancelled() {
        let err = AuthError::CeremonyCancelled {
            reason: "timed out after 60s".to_string(),
        };
        assert_eq!(err.to_string(), "ceremony cancelled: timed out after 60s");
    }

    #[test]
    fn error_display_reauth() {
        assert_eq!(
            AuthError::ReauthenticationRequired.to_string(),
            "re-authentication required"
        );
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<AuthError>();
    }
}
