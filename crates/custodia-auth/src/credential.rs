//! Stored credential shape.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::platform::{AuthenticatorAttachment, DeviceInfo, KeyAlgorithm};

/// Advisory label for how the user unlocks a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BiometricType {
    Fingerprint,
    Face,
    Voice,
    Pin,
    Pattern,
}

impl BiometricType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fingerprint => "fingerprint",
            Self::Face => "face",
            Self::Voice => "voice",
            Self::Pin => "pin",
            Self::Pattern => "pattern",
        }
    }

    /// Best guess from device signals. Never authoritative: the platform does
    /// not report which modality the user actually used.
    pub fn infer(device: &DeviceInfo, attachment: AuthenticatorAttachment) -> Self {
        if attachment == AuthenticatorAttachment::CrossPlatform {
            return Self::Pin;
        }
        let signals = format!(
            "{} {} {}",
            device.platform,
            device.user_agent,
            device.model.as_deref().unwrap_or_default()
        )
        .to_lowercase();

        if ["iphone", "ipad", "windows"].iter().any(|s| signals.contains(s)) {
            Self::Face
        } else {
            Self::Fingerprint
        }
    }
}

/// A registered public-key credential. The portable persisted shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BiometricCredential {
    pub id: String,
    #[serde(rename = "type")]
    pub credential_type: BiometricType,
    #[serde(with = "b64")]
    pub public_key: Vec<u8>,
    pub algorithm: KeyAlgorithm,
    /// Highest signature counter seen, bumped on every success.
    pub counter: u32,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used: Option<DateTime<Utc>>,
    pub device_info: DeviceInfo,
    pub user_id: String,
}

/// Whether a reported signature counter went backwards.
///
/// A counter of zero means the authenticator does not implement counters
/// and is never treated as a regression. Acting on a regression (locking the
/// credential, alerting) is left to the caller.
pub fn counter_regressed(previous: u32, reported: u32) -> bool {
    reported != 0 && reported < previous
}

mod b64 {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
