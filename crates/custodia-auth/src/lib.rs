//! Credential authority for Custodia.
//!
//! Users authenticate with public-key credentials created by the device's
//! credential manager (fingerprint, face, security key), with a salted PIN
//! hash as the fallback. Every assertion is checked against a fresh random
//! challenge and verified with the stored public key.
//!
//! # Modules
//!
//! - [`platform`] — the [`CredentialPlatform`] seam and ceremony data shapes.
//! - [`credential`] — the persisted credential and counter helpers.
//! - [`pin`] — PBKDF2 PIN verifiers.
//! - [`authority`] — the [`CredentialAuthority`] service.
//! - [`error`] — Unified error types.

pub mod authority;
pub mod credential;
pub mod error;
pub mod pin;
pub mod platform;

// Re-export the most commonly used types at the crate root for convenience.
pub use authority::{
    AuthFailure, AuthSettings, AuthenticateOptions, AuthenticationResult, CredentialAuthority,
    FailureKind, RegisterOptions, SupportInfo,
};
pub use credential::{BiometricCredential, BiometricType, counter_regressed};
pub use error::{AuthError, Result};
pub use pin::PinRecord;
pub use platform::{
    Assertion, AuthenticatorAttachment, AuthenticatorData, ClientData, CreatedCredential,
    CreationOptions, CredentialPlatform, DeviceInfo, KeyAlgorithm, PlatformError, RequestOptions,
    UserVerification,
};
