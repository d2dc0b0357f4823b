//! The credential authority service.
//!
//! [`CredentialAuthority`] runs registration and assertion ceremonies through
//! a [`CredentialPlatform`], verifies what comes back (challenge echo, origin,
//! relying-party hash, signature), and keeps the registered credentials in
//! the vault. A salted PIN hash provides the fallback path.
//!
//! Removing credentials or the PIN requires a successful authentication,
//! platform or PIN, within the configured re-authentication window.

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use custodia_kernel::SharedClock;
use custodia_vault::CryptoVault;
use ring::rand::{SecureRandom, SystemRandom};
use ring::signature::{self, UnparsedPublicKey, VerificationAlgorithm};
use serde::{Deserialize, Serialize};

use crate::credential::{BiometricCredential, BiometricType};
use crate::error::{AuthError, Result};
use crate::pin::{DEFAULT_PIN_ITERATIONS, PinRecord};
use crate::platform::{
    Assertion, AuthenticatorAttachment, AuthenticatorData, ClientData, CreationOptions,
    CredentialPlatform, CREATE_TYPE, GET_TYPE, KeyAlgorithm, PlatformError, RequestOptions,
    UserVerification,
};

/// Vault item holding the registered credentials.
pub const CREDENTIALS_KEY: &str = "biometric_credentials";

/// Vault item holding the PIN verifier.
pub const PIN_KEY: &str = "auth:pin";

/// Challenge size in bytes.
pub const CHALLENGE_LEN: usize = 32;

// ---------------------------------------------------------------------------
// Settings and options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSettings {
    /// Relying-party id credentials are bound to.
    pub rp_id: String,
    pub rp_name: String,
    /// Origin the platform must report in client data.
    pub origin: String,
    pub ceremony_timeout_secs: u64,
    pub quick_auth_timeout_secs: u64,
    /// How long a successful authentication unlocks management operations.
    pub reauth_window_secs: u64,
    pub pin_iterations: u32,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            rp_id: "custodia.local".to_string(),
            rp_name: "Custodia".to_string(),
            origin: "https://custodia.local".to_string(),
            ceremony_timeout_secs: 60,
            quick_auth_timeout_secs: 15,
            reauth_window_secs: 300,
            pin_iterations: DEFAULT_PIN_ITERATIONS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegisterOptions {
    pub user_verification: UserVerification,
    /// `None` lets the platform pick any available authenticator.
    pub attachment: Option<AuthenticatorAttachment>,
    /// Overrides the configured ceremony timeout.
    pub timeout: Option<Duration>,
}

impl Default for RegisterOptions {
    fn default() -> Self {
        Self {
            user_verification: UserVerification::Required,
            attachment: Some(AuthenticatorAttachment::Platform),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthenticateOptions {
    pub user_verification: UserVerification,
    pub timeout: Option<Duration>,
}

/// Capability probe result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportInfo {
    pub supported: bool,
    pub types: Vec<AuthenticatorAttachment>,
}

// ---------------------------------------------------------------------------
// Authentication result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NotSupported,
    Cancelled,
    CredentialNotFound,
    VerificationFailed,
    Platform,
    Storage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl From<&AuthError> for AuthFailure {
    fn from(err: &AuthError) -> Self {
        let kind = match err {
            AuthError::NotSupported { .. } => FailureKind::NotSupported,
            AuthError::CeremonyCancelled { .. } => FailureKind::Cancelled,
            AuthError::CredentialNotFound { .. } | AuthError::PinNotSet => {
                FailureKind::CredentialNotFound
            }
            AuthError::VerificationFailed { .. } | AuthError::ReauthenticationRequired => {
                FailureKind::VerificationFailed
            }
            AuthError::Platform(_) | AuthError::InvalidInput(_) => FailureKind::Platform,
            AuthError::Crypto(_)
            | AuthError::Vault(_)
            | AuthError::Serialization(_)
            | AuthError::CredentialStoreUnreadable => FailureKind::Storage,
        };
        Self {
            kind,
            message: err.to_string(),
        }
    }
}

/// Outcome of [`CredentialAuthority::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationResult {
    pub success: bool,
    pub credential_id: Option<String>,
    pub credential_type: Option<BiometricType>,
    /// Counter reported by the authenticator in this assertion, unmodified.
    pub signature_counter: Option<u32>,
    /// Stored counter before this assertion.
    pub previous_counter: Option<u32>,
    pub user_handle: Option<String>,
    pub failure: Option<AuthFailure>,
}

impl AuthenticationResult {
    fn failed(err: &AuthError) -> Self {
        Self {
            success: false,
            credential_id: None,
            credential_type: None,
            signature_counter: None,
            previous_counter: None,
            user_handle: None,
            failure: Some(AuthFailure::from(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Public-key credential ceremonies with a PIN fallback.
pub struct CredentialAuthority {
    platform: Arc<dyn CredentialPlatform>,
    vault: Arc<CryptoVault>,
    clock: SharedClock,
    settings: AuthSettings,
    rng: SystemRandom,
    /// Serializes read-modify-write of the credential list.
    credentials_lock: Mutex<()>,
    last_authenticated: Mutex<Option<DateTime<Utc>>>,
}

impl CredentialAuthority {
    pub fn new(
        platform: Arc<dyn CredentialPlatform>,
        vault: Arc<CryptoVault>,
        clock: SharedClock,
        settings: AuthSettings,
    ) -> Self {
        tracing::info!(rp_id = %settings.rp_id, "credential authority initialised");
        Self {
            platform,
            vault,
            clock,
            settings,
            rng: SystemRandom::new(),
            credentials_lock: Mutex::new(()),
            last_authenticated: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &AuthSettings {
        &self.settings
    }

    /// Probe which ceremony kinds the device offers.
    pub async fn is_supported(&self) -> SupportInfo {
        let mut types = Vec::new();
        if self.platform.platform_authenticator_available().await {
            types.push(AuthenticatorAttachment::Platform);
        }
        if self.platform.cross_platform_available().await {
            types.push(AuthenticatorAttachment::CrossPlatform);
        }
        SupportInfo {
            supported: !types.is_empty(),
            types,
        }
    }

    // -- Registration -------------------------------------------------------

    /// Create and store a new credential for `user_id`.
    ///
    /// # Errors
    ///
    /// [`AuthError::NotSupported`] when the requested authenticator kind is
    /// unavailable, [`AuthError::CeremonyCancelled`] when the user cancels or
    /// the timeout elapses, [`AuthError::VerificationFailed`] when the
    /// platform response does not match the request.
    pub async fn register(
        &self,
        user_id: &str,
        user_name: &str,
        options: RegisterOptions,
    ) -> Result<BiometricCredential> {
        if user_id.is_empty() || user_name.is_empty() {
            return Err(AuthError::InvalidInput("user id and name are required".into()));
        }

        let support = self.is_supported().await;
        let available = match options.attachment {
            Some(kind) => support.types.contains(&kind),
            None => support.supported,
        };
        if !available {
            return Err(AuthError::NotSupported {
                capability: options
                    .attachment
                    .map_or("credential ceremonies", |a| a.as_str())
                    .to_string(),
            });
        }

        let challenge = self.challenge()?;
        let creation = CreationOptions {
            challenge: challenge.clone(),
            rp_id: self.settings.rp_id.clone(),
            rp_name: self.settings.rp_name.clone(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            user_verification: options.user_verification,
            attachment: options.attachment,
            algorithms: vec![KeyAlgorithm::Ed25519, KeyAlgorithm::EcdsaP256],
            timeout: options.timeout.unwrap_or(self.ceremony_timeout()),
        };

        tracing::info!(user_id = %user_id, "starting credential registration");
        let created = ceremony(self.platform.create(&creation), creation.timeout).await?;

        self.check_client_data(&created.client_data_json, CREATE_TYPE, &challenge)?;
        if created.id.is_empty() {
            return Err(verification("platform returned an empty credential id"));
        }
        if !creation.algorithms.contains(&created.algorithm)
            || !created.algorithm.accepts_key(&created.public_key)
        {
            return Err(verification("public key does not match its algorithm"));
        }

        let device_info = self.platform.device_info();
        let credential = BiometricCredential {
            id: created.id,
            credential_type: BiometricType::infer(&device_info, created.attachment),
            public_key: created.public_key,
            algorithm: created.algorithm,
            counter: 0,
            created_at: self.clock.now(),
            last_used: None,
            device_info,
            user_id: user_id.to_string(),
        };

        {
            let _lock = self.credentials_lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut stored = self.load_credentials()?;
            stored.retain(|c| c.id != credential.id);
            stored.push(credential.clone());
            self.save_credentials(&stored)?;
        }

        tracing::info!(
            credential_id = %credential.id,
            credential_type = credential.credential_type.as_str(),
            "credential registered"
        );
        Ok(credential)
    }

    // -- Authentication -----------------------------------------------------

    /// Ask the platform for an assertion from any stored credential.
    ///
    /// Never fails: cancellation, timeouts and verification problems come
    /// back as a result with `success == false` and a [`AuthFailure`].
    pub async fn authenticate(&self, options: AuthenticateOptions) -> AuthenticationResult {
        match self.try_authenticate(options).await {
            Ok(result) => result,
            Err(err) => {
                tracing::warn!(error = %err, "authentication failed");
                AuthenticationResult::failed(&err)
            }
        }
    }

    /// Low-friction unlock: short timeout, user verification discouraged.
    pub async fn quick_auth(&self) -> AuthenticationResult {
        self.authenticate(AuthenticateOptions {
            user_verification: UserVerification::Discouraged,
            timeout: Some(Duration::from_secs(self.settings.quick_auth_timeout_secs)),
        })
        .await
    }

    async fn try_authenticate(&self, options: AuthenticateOptions) -> Result<AuthenticationResult> {
        let credentials = self.load_credentials()?;
        if credentials.is_empty() {
            return Err(AuthError::CredentialNotFound {
                id: "no credentials registered".into(),
            });
        }
        if !self.is_supported().await.supported {
            return Err(AuthError::NotSupported {
                capability: "credential ceremonies".into(),
            });
        }

        let challenge = self.challenge()?;
        let request = RequestOptions {
            challenge: challenge.clone(),
            rp_id: self.settings.rp_id.clone(),
            allow_credentials: credentials.iter().map(|c| c.id.clone()).collect(),
            user_verification: options.user_verification,
            timeout: options.timeout.unwrap_or(self.ceremony_timeout()),
        };

        let assertion = ceremony(self.platform.get(&request), request.timeout).await?;

        let credential = credentials
            .iter()
            .find(|c| c.id == assertion.credential_id)
            .ok_or_else(|| AuthError::CredentialNotFound {
                id: assertion.credential_id.clone(),
            })?;

        self.check_client_data(&assertion.client_data_json, GET_TYPE, &challenge)?;
        let auth_data = AuthenticatorData::parse(&assertion.authenticator_data)
            .ok_or_else(|| verification("authenticator data is truncated"))?;
        if !auth_data.matches_rp(&self.settings.rp_id) {
            return Err(verification("relying party mismatch"));
        }
        if !auth_data.user_present() {
            return Err(verification("user presence not asserted"));
        }
        if options.user_verification == UserVerification::Required && !auth_data.user_verified() {
            return Err(verification("user verification required but not performed"));
        }
        verify_signature(credential, &assertion)?;

        let now = self.clock.now();
        let previous = {
            let _lock = self.credentials_lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut stored = self.load_credentials()?;
            let entry = stored
                .iter_mut()
                .find(|c| c.id == credential.id)
                .ok_or_else(|| AuthError::CredentialNotFound {
                    id: credential.id.clone(),
                })?;
            let previous = entry.counter;
            entry.counter = previous.saturating_add(1).max(auth_data.sign_count);
            entry.last_used = Some(now);
            self.save_credentials(&stored)?;
            previous
        };
        self.mark_authenticated(now);

        tracing::info!(
            credential_id = %credential.id,
            signature_counter = auth_data.sign_count,
            "authentication succeeded"
        );
        Ok(AuthenticationResult {
            success: true,
            credential_id: Some(credential.id.clone()),
            credential_type: Some(credential.credential_type),
            signature_counter: Some(auth_data.sign_count),
            previous_counter: Some(previous),
            user_handle: assertion.user_handle,
            failure: None,
        })
    }

    // -- PIN fallback -------------------------------------------------------

    /// Store a hash of `pin`. Replacing an existing PIN requires a recent
    /// authentication.
    pub async fn setup_pin(&self, pin: &str) -> Result<()> {
        if self.has_pin()? {
            self.ensure_recent_authentication()?;
        }

        let pin = pin.to_string();
        let iterations = self.settings.pin_iterations;
        let now = self.clock.now();
        let record = tokio::task::spawn_blocking(move || PinRecord::create(&pin, iterations, now))
            .await
            .map_err(|e| AuthError::Crypto(format!("PIN hashing task failed: {e}")))??;

        self.vault.set_item(PIN_KEY, &record)?;
        tracing::info!("PIN set up");
        Ok(())
    }

    /// Check `pin` against the stored hash in constant time.
    ///
    /// # Errors
    ///
    /// [`AuthError::PinNotSet`] when no PIN exists.
    pub async fn authenticate_with_pin(&self, pin: &str) -> Result<bool> {
        let record: PinRecord = self.vault.get_item(PIN_KEY).ok_or(AuthError::PinNotSet)?;

        let pin = pin.to_string();
        let ok = tokio::task::spawn_blocking(move || record.verify(&pin))
            .await
            .map_err(|e| AuthError::Crypto(format!("PIN verification task failed: {e}")))?;

        if ok {
            self.mark_authenticated(self.clock.now());
            tracing::info!("PIN authentication succeeded");
        } else {
            tracing::warn!("PIN authentication failed");
        }
        Ok(ok)
    }

    pub fn has_pin(&self) -> Result<bool> {
        Ok(self.vault.has_item(PIN_KEY)?)
    }

    /// Delete the PIN. Requires a recent authentication.
    pub fn remove_pin(&self) -> Result<()> {
        self.ensure_recent_authentication()?;
        self.vault.remove_item(PIN_KEY)?;
        tracing::info!("PIN removed");
        Ok(())
    }

    // -- Credential management ----------------------------------------------

    /// Registered credentials. Empty when none exist or the stored list is
    /// unreadable.
    pub fn list_credentials(&self) -> Vec<BiometricCredential> {
        self.load_credentials().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cannot list credentials");
            Vec::new()
        })
    }

    /// Delete one credential. Requires a recent authentication.
    pub fn remove_credential(&self, id: &str) -> Result<()> {
        self.ensure_recent_authentication()?;

        let _lock = self.credentials_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut stored = self.load_credentials()?;
        let before = stored.len();
        stored.retain(|c| c.id != id);
        if stored.len() == before {
            return Err(AuthError::CredentialNotFound { id: id.to_string() });
        }
        self.save_credentials(&stored)?;
        tracing::info!(credential_id = %id, "credential removed");
        Ok(())
    }

    /// Delete every credential. Requires a recent authentication.
    pub fn clear_credentials(&self) -> Result<usize> {
        self.ensure_recent_authentication()?;

        let _lock = self.credentials_lock.lock().unwrap_or_else(|e| e.into_inner());
        // An unreadable list is still removed here; nothing else can recover it.
        let count = self.load_credentials().map(|c| c.len()).unwrap_or(0);
        self.vault.remove_item(CREDENTIALS_KEY)?;
        tracing::warn!(count, "all credentials cleared");
        Ok(count)
    }

    /// Time of the last successful platform or PIN authentication.
    pub fn last_authenticated_at(&self) -> Option<DateTime<Utc>> {
        *self.last_authenticated.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_recent_authentication(&self) -> Result<()> {
        let window = chrono::Duration::seconds(
            i64::try_from(self.settings.reauth_window_secs).unwrap_or(i64::MAX / 1000),
        );
        match self.last_authenticated_at() {
            Some(at) if self.clock.now() - at <= window => Ok(()),
            _ => Err(AuthError::ReauthenticationRequired),
        }
    }

    // -- Internals ----------------------------------------------------------

    fn mark_authenticated(&self, at: DateTime<Utc>) {
        *self.last_authenticated.lock().unwrap_or_else(|e| e.into_inner()) = Some(at);
    }

    fn ceremony_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.ceremony_timeout_secs)
    }

    fn challenge(&self) -> Result<Vec<u8>> {
        let mut challenge = vec![0u8; CHALLENGE_LEN];
        self.rng
            .fill(&mut challenge)
            .map_err(|_| AuthError::Crypto("failed to generate challenge".into()))?;
        Ok(challenge)
    }

    fn check_client_data(&self, raw: &[u8], kind: &str, challenge: &[u8]) -> Result<()> {
        let data: ClientData =
            serde_json::from_slice(raw).map_err(|_| verification("client data is not valid JSON"))?;
        if data.kind != kind {
            return Err(verification(format!("unexpected client data type {}", data.kind)));
        }
        if data.challenge != URL_SAFE_NO_PAD.encode(challenge) {
            return Err(verification("challenge mismatch"));
        }
        if data.origin != self.settings.origin {
            return Err(verification(format!("unexpected origin {}", data.origin)));
        }
        Ok(())
    }

    /// Stored credentials. Absent means none; present but unreadable is an
    /// error so callers never overwrite it with a fresh list.
    fn load_credentials(&self) -> Result<Vec<BiometricCredential>> {
        match self.vault.get_item(CREDENTIALS_KEY) {
            Some(credentials) => Ok(credentials),
            None if self.vault.has_item(CREDENTIALS_KEY)? => {
                tracing::error!(key = CREDENTIALS_KEY, "stored credential list is unreadable");
                Err(AuthError::CredentialStoreUnreadable)
            }
            None => Ok(Vec::new()),
        }
    }

    fn save_credentials(&self, credentials: &[BiometricCredential]) -> Result<()> {
        self.vault.set_item(CREDENTIALS_KEY, credentials)?;
        Ok(())
    }
}

/// Run a platform ceremony under `timeout`, mapping its failures.
async fn ceremony<T>(
    fut: impl Future<Output = std::result::Result<T, PlatformError>>,
    timeout: Duration,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(PlatformError::Cancelled)) => Err(AuthError::CeremonyCancelled {
            reason: "the user cancelled the prompt".into(),
        }),
        Ok(Err(PlatformError::NotAllowed(reason))) => Err(AuthError::CeremonyCancelled { reason }),
        Ok(Err(PlatformError::NotSupported)) => Err(AuthError::NotSupported {
            capability: "credential ceremonies".into(),
        }),
        Ok(Err(PlatformError::Other(message))) => Err(AuthError::Platform(message)),
        Err(_) => Err(AuthError::CeremonyCancelled {
            reason: format!("timed out after {}s", timeout.as_secs()),
        }),
    }
}

fn verify_signature(credential: &BiometricCredential, assertion: &Assertion) -> Result<()> {
    let algorithm: &'static dyn VerificationAlgorithm = match credential.algorithm {
        KeyAlgorithm::Ed25519 => &signature::ED25519,
        KeyAlgorithm::EcdsaP256 => &signature::ECDSA_P256_SHA256_ASN1,
    };
    UnparsedPublicKey::new(algorithm, &credential.public_key)
        .verify(&assertion.signed_message(), &assertion.signature)
        .map_err(|_| verification("signature does not verify"))
}

fn verification(reason: impl Into<String>) -> AuthError {
    AuthError::VerificationFailed {
        reason: reason.into(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
