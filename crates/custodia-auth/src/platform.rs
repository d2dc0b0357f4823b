//! The platform credential-manager seam.
//!
//! [`CredentialPlatform`] is whatever can run a public-key credential
//! ceremony on this device: a browser's credential API, an OS biometric
//! service, an external security key. It exposes `create()` for registration
//! and `get()` for assertions, with the same challenge / client-data /
//! authenticator-data shape for every backend.
//!
//! Signed assertions cover `authenticator_data || SHA-256(client_data_json)`.
//! Authenticator data starts with the relying-party id hash (32 bytes), one
//! flags byte and a big-endian 32-bit signature counter.

use std::time::Duration;

use async_trait::async_trait;
use ring::digest;
use serde::{Deserialize, Serialize};

/// Client-data `type` of a registration ceremony.
pub const CREATE_TYPE: &str = "webauthn.create";

/// Client-data `type` of an assertion ceremony.
pub const GET_TYPE: &str = "webauthn.get";

const RP_ID_HASH_LEN: usize = 32;
const AUTH_DATA_MIN_LEN: usize = RP_ID_HASH_LEN + 1 + 4;
const FLAG_USER_PRESENT: u8 = 0x01;
const FLAG_USER_VERIFIED: u8 = 0x04;

// ---------------------------------------------------------------------------
// Ceremony options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    Required,
    #[default]
    Preferred,
    Discouraged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthenticatorAttachment {
    /// Built into the device (fingerprint reader, face camera, device PIN).
    Platform,
    /// Roaming authenticator such as a USB or NFC security key.
    CrossPlatform,
}

impl AuthenticatorAttachment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Platform => "platform",
            Self::CrossPlatform => "cross-platform",
        }
    }
}

/// Signature algorithm of a credential key pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAlgorithm {
    /// Raw 32-byte public key.
    Ed25519,
    /// Uncompressed 65-byte SEC1 point, ASN.1 DER signatures.
    EcdsaP256,
}

impl KeyAlgorithm {
    /// COSE algorithm identifier.
    pub fn cose_id(&self) -> i32 {
        match self {
            Self::Ed25519 => -8,
            Self::EcdsaP256 => -7,
        }
    }

    /// Whether `public_key` has the encoding this algorithm expects.
    pub fn accepts_key(&self, public_key: &[u8]) -> bool {
        match self {
            Self::Ed25519 => public_key.len() == 32,
            Self::EcdsaP256 => public_key.len() == 65 && public_key[0] == 0x04,
        }
    }
}

/// Parameters of a create-credential ceremony.
#[derive(Debug, Clone)]
pub struct CreationOptions {
    pub challenge: Vec<u8>,
    pub rp_id: String,
    pub rp_name: String,
    pub user_id: String,
    pub user_name: String,
    pub user_verification: UserVerification,
    pub attachment: Option<AuthenticatorAttachment>,
    /// Acceptable algorithms, most preferred first.
    pub algorithms: Vec<KeyAlgorithm>,
    pub timeout: Duration,
}

/// Parameters of an assertion ceremony.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub challenge: Vec<u8>,
    pub rp_id: String,
    /// Ids of the credentials the platform may use.
    pub allow_credentials: Vec<String>,
    pub user_verification: UserVerification,
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Ceremony responses
// ---------------------------------------------------------------------------

/// A newly created credential.
#[derive(Debug, Clone)]
pub struct CreatedCredential {
    pub id: String,
    pub public_key: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    pub client_data_json: Vec<u8>,
    pub attachment: AuthenticatorAttachment,
}

/// A signed assertion.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub credential_id: String,
    pub client_data_json: Vec<u8>,
    pub authenticator_data: Vec<u8>,
    pub signature: Vec<u8>,
    pub user_handle: Option<String>,
}

impl Assertion {
    /// The bytes covered by `signature`.
    pub fn signed_message(&self) -> Vec<u8> {
        signed_message(&self.authenticator_data, &self.client_data_json)
    }
}

/// `authenticator_data || SHA-256(client_data_json)`.
pub fn signed_message(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let client_hash = digest::digest(&digest::SHA256, client_data_json);
    let mut message = Vec::with_capacity(authenticator_data.len() + client_hash.as_ref().len());
    message.extend_from_slice(authenticator_data);
    message.extend_from_slice(client_hash.as_ref());
    message
}

/// Client data collected by the platform and echoed back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    #[serde(rename = "type")]
    pub kind: String,
    /// Base64url (unpadded) challenge.
    pub challenge: String,
    pub origin: String,
}

/// Parsed fixed prefix of authenticator data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatorData {
    pub rp_id_hash: [u8; RP_ID_HASH_LEN],
    pub flags: u8,
    pub sign_count: u32,
}

impl AuthenticatorData {
    /// Parse the first 37 bytes; trailing extension data is ignored.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < AUTH_DATA_MIN_LEN {
            return None;
        }
        let rp_id_hash = bytes[..RP_ID_HASH_LEN].try_into().ok()?;
        let flags = bytes[RP_ID_HASH_LEN];
        let count: [u8; 4] = bytes[RP_ID_HASH_LEN + 1..AUTH_DATA_MIN_LEN].try_into().ok()?;
        Some(Self {
            rp_id_hash,
            flags,
            sign_count: u32::from_be_bytes(count),
        })
    }

    /// Encode for `rp_id` with the given presence/verification bits.
    pub fn encode(rp_id: &str, user_present: bool, user_verified: bool, sign_count: u32) -> Vec<u8> {
        let mut flags = 0;
        if user_present {
            flags |= FLAG_USER_PRESENT;
        }
        if user_verified {
            flags |= FLAG_USER_VERIFIED;
        }
        let mut out = Vec::with_capacity(AUTH_DATA_MIN_LEN);
        out.extend_from_slice(rp_id_hash(rp_id).as_ref());
        out.push(flags);
        out.extend_from_slice(&sign_count.to_be_bytes());
        out
    }

    pub fn user_present(&self) -> bool {
        self.flags & FLAG_USER_PRESENT != 0
    }

    pub fn user_verified(&self) -> bool {
        self.flags & FLAG_USER_VERIFIED != 0
    }

    pub fn matches_rp(&self, rp_id: &str) -> bool {
        self.rp_id_hash.as_slice() == rp_id_hash(rp_id).as_ref()
    }
}

fn rp_id_hash(rp_id: &str) -> digest::Digest {
    digest::digest(&digest::SHA256, rp_id.as_bytes())
}

/// Device signals used to label credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    /// Operating system or browser platform string.
    pub platform: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub model: Option<String>,
}

// ---------------------------------------------------------------------------
// Platform trait
// ---------------------------------------------------------------------------

/// Failure reported by a platform ceremony.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlatformError {
    #[error("the user cancelled the prompt")]
    Cancelled,
    #[error("the platform refused the request: {0}")]
    NotAllowed(String),
    #[error("the requested ceremony is not supported")]
    NotSupported,
    #[error("{0}")]
    Other(String),
}

/// A device credential manager capable of public-key ceremonies.
#[async_trait]
pub trait CredentialPlatform: Send + Sync {
    /// Whether a built-in (platform) authenticator is available.
    async fn platform_authenticator_available(&self) -> bool;

    /// Whether an external (cross-platform) authenticator can be used.
    async fn cross_platform_available(&self) -> bool;

    fn device_info(&self) -> DeviceInfo;

    /// Create a key pair bound to `options.rp_id`.
    async fn create(&self, options: &CreationOptions) -> Result<CreatedCredential, PlatformError>;

    /// Sign the challenge with one of `options.allow_credentials`.
    async fn get(&self, options: &RequestOptions) -> Result<Assertion, PlatformError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn authenticator_data_roundtrip() {
        let bytes = AuthenticatorData::encode("custodia.local", true, false, 258);
        assert_eq!(bytes.len(), 37);

        let parsed = AuthenticatorData::parse(&bytes).unwrap();
        assert!(parsed.user_present());
        assert!(!parsed.user_verified());
        assert_eq!(parsed.sign_count, 258);
        assert!(parsed.matches_rp("custodia.local"));
        assert!(!parsed.matches_rp("evil.example"));
    }

    #[test]
    fn short_authenticator_data_is_rejected() {
        assert_eq!(AuthenticatorData::parse(&[0; 36]), None);
    }

    #[test]
    fn key_encodings_are_checked() {
        assert!(KeyAlgorithm::Ed25519.accepts_key(&[7; 32]));
        assert!(!KeyAlgorithm::Ed25519.accepts_key(&[7; 33]));
        let mut p256 = vec![0x04];
        p256.extend_from_slice(&[1; 64]);
        assert!(KeyAlgorithm::EcdsaP256.accepts_key(&p256));
        p256[0] = 0x02;
        assert!(!KeyAlgorithm::EcdsaP256.accepts_key(&p256));
    }

    #[test]
    fn client_data_uses_type_field() {
        let data = ClientData {
            kind: GET_TYPE.into(),
            challenge: "abc".into(),
            origin: "https://custodia.local".into(),
        };
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "webauthn.get");
    }
}
