//! Envelope wire format.
//!
//! One [`Envelope`] is produced per encryption call. On the wire it is a JSON
//! object with base64 fields:
//!
//! ```text
//! { "data": base64(ciphertext || tag), "iv": base64, "salt": base64, "timestamp": epoch-ms }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Serialized result of one encryption call.
///
/// `salt` and `iv` are freshly random for every envelope and are never
/// reused, even for identical plaintexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// AES-256-GCM ciphertext with the 16-byte tag appended.
    #[serde(rename = "data", with = "b64")]
    pub ciphertext: Vec<u8>,

    /// 96-bit GCM nonce.
    #[serde(with = "b64")]
    pub iv: Vec<u8>,

    /// 128-bit PBKDF2 salt.
    #[serde(with = "b64")]
    pub salt: Vec<u8>,

    /// Creation time in milliseconds since the Unix epoch.
    pub timestamp: i64,
}

impl Envelope {
    /// Encode to the JSON wire format.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire format.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
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
