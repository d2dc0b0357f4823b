//! Passphrase-based envelope encryption and encrypted item storage.
//!
//! [`CryptoVault`] turns any serializable value into an [`Envelope`]:
//! PBKDF2-HMAC-SHA256 derives a key from the passphrase and a fresh 128-bit
//! salt, then AES-256-GCM seals the JSON encoding under a fresh 96-bit nonce.
//!
//! The vault also stores envelopes in a [`KeyValueStore`] under logical item
//! keys (`set_item` / `get_item` / `remove_item`), using the passphrase it
//! was constructed with.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::crypto::{self, MIN_PBKDF2_ITERATIONS, NONCE_LEN_BYTES, SALT_LEN};
use crate::envelope::Envelope;
use crate::error::{Result, VaultError};
use crate::store::KeyValueStore;

/// Storage key prefix for encrypted items.
const ITEM_PREFIX: &str = "secure:";

/// Options accepted by the encrypt/decrypt operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptOptions {
    /// PBKDF2 iteration count. Raised to [`MIN_PBKDF2_ITERATIONS`] if lower.
    pub iterations: u32,
}

impl Default for EncryptOptions {
    fn default() -> Self {
        Self {
            iterations: MIN_PBKDF2_ITERATIONS,
        }
    }
}

/// Symmetric encryption vault bound to a passphrase and a backing store.
pub struct CryptoVault {
    store: Arc<dyn KeyValueStore>,
    passphrase: Vec<u8>,
    options: EncryptOptions,
}

impl CryptoVault {
    /// Create a vault that persists through `store` and seals items with
    /// `passphrase`.
    pub fn new(store: Arc<dyn KeyValueStore>, passphrase: impl AsRef<[u8]>) -> Self {
        Self {
            store,
            passphrase: passphrase.as_ref().to_vec(),
            options: EncryptOptions::default(),
        }
    }

    /// Override the options used by the item operations.
    pub fn with_options(mut self, options: EncryptOptions) -> Self {
        self.options = options;
        self
    }

    /// The backing store shared with other services.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    // -- Stateless envelope operations --------------------------------------

    /// Serialize `data` and seal it under `password`.
    ///
    /// A fresh salt and nonce are drawn on every call.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Serialization`] if `data` cannot be encoded,
    /// [`VaultError::KeyDerivationFailed`] for an empty password, or
    /// [`VaultError::EncryptionFailed`].
    pub fn encrypt<T: Serialize + ?Sized>(
        data: &T,
        password: &[u8],
        options: &EncryptOptions,
    ) -> Result<Envelope> {
        let plaintext = serde_json::to_vec(data)?;
        seal(&plaintext, password, options)
    }

    /// Open `envelope` with `password` and deserialize the payload.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::DecryptionFailed`] for a wrong password, any
    /// modified byte of ciphertext / iv / salt, or a payload that does not
    /// deserialize into `T`.
    pub fn decrypt<T: DeserializeOwned>(
        envelope: &Envelope,
        password: &[u8],
        options: &EncryptOptions,
    ) -> Result<T> {
        let plaintext = open(envelope, password, options)?;
        serde_json::from_slice(&plaintext).map_err(|_| VaultError::DecryptionFailed)
    }

    /// [`encrypt`](Self::encrypt) on the blocking thread pool.
    pub async fn encrypt_async<T: Serialize + ?Sized>(
        data: &T,
        password: &[u8],
        options: EncryptOptions,
    ) -> Result<Envelope> {
        let plaintext = serde_json::to_vec(data)?;
        let password = password.to_vec();
        tokio::task::spawn_blocking(move || seal(&plaintext, &password, &options))
            .await
            .map_err(|e| VaultError::Internal(format!("encryption task failed: {e}")))?
    }

    /// [`decrypt`](Self::decrypt) on the blocking thread pool.
    pub async fn decrypt_async<T: DeserializeOwned + Send + 'static>(
        envelope: Envelope,
        password: &[u8],
        options: EncryptOptions,
    ) -> Result<T> {
        let password = password.to_vec();
        tokio::task::spawn_blocking(move || Self::decrypt(&envelope, &password, &options))
            .await
            .map_err(|e| VaultError::Internal(format!("decryption task failed: {e}")))?
    }

    // -- Passphrase-bound envelopes -----------------------------------------

    /// Seal `data` with the vault passphrase without persisting it.
    pub fn seal<T: Serialize + ?Sized>(&self, data: &T) -> Result<Envelope> {
        Self::encrypt(data, &self.passphrase, &self.options)
    }

    /// Open an envelope produced by [`seal`](Self::seal).
    pub fn open<T: DeserializeOwned>(&self, envelope: &Envelope) -> Result<T> {
        Self::decrypt(envelope, &self.passphrase, &self.options)
    }

    // -- Item storage -------------------------------------------------------

    /// Seal `data` with the vault passphrase and persist it under `key`.
    pub fn set_item<T: Serialize + ?Sized>(&self, key: &str, data: &T) -> Result<()> {
        let envelope = Self::encrypt(data, &self.passphrase, &self.options)?;
        self.store.set(&item_key(key), &envelope.to_json()?)?;
        tracing::debug!(key = key, "stored encrypted item");
        Ok(())
    }

    /// Load and open the item stored under `key`.
    ///
    /// Returns `None` when the key is missing, the stored value is not a
    /// valid envelope, or it fails to decrypt. Corruption is logged, never
    /// raised.
    pub fn get_item<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(&item_key(key)) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key = key, error = %e, "failed to read encrypted item");
                return None;
            }
        };

        let opened = Envelope::from_json(&raw)
            .map_err(|_| VaultError::DecryptionFailed)
            .and_then(|envelope| Self::decrypt(&envelope, &self.passphrase, &self.options));

        match opened {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = key, error = %e, "discarding unreadable encrypted item");
                None
            }
        }
    }

    /// Remove the item stored under `key`. Absent keys are ignored.
    pub fn remove_item(&self, key: &str) -> Result<()> {
        self.store.remove(&item_key(key))?;
        tracing::debug!(key = key, "removed encrypted item");
        Ok(())
    }

    /// Whether an item (readable or not) exists under `key`.
    pub fn has_item(&self, key: &str) -> Result<bool> {
        Ok(self.store.get(&item_key(key))?.is_some())
    }

    /// Logical keys of stored items that start with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let keys = self
            .store
            .keys()?
            .into_iter()
            .filter_map(|k| k.strip_prefix(ITEM_PREFIX).map(str::to_string))
            .filter(|k| k.starts_with(prefix))
            .collect();
        Ok(keys)
    }
}

fn item_key(key: &str) -> String {
    format!("{ITEM_PREFIX}{key}")
}

fn seal(plaintext: &[u8], password: &[u8], options: &EncryptOptions) -> Result<Envelope> {
    let salt: [u8; SALT_LEN] = crypto::random_array().map_err(|_| VaultError::EncryptionFailed {
        reason: "failed to generate random salt".into(),
    })?;
    let key = crypto::derive_key(password, &salt, options.iterations)?;
    let (iv, ciphertext) = crypto::encrypt(plaintext, &key)?;

    Ok(Envelope {
        ciphertext,
        iv: iv.to_vec(),
        salt: salt.to_vec(),
        timestamp: Utc::now().timestamp_millis(),
    })
}

fn open(envelope: &Envelope, password: &[u8], options: &EncryptOptions) -> Result<Vec<u8>> {
    if envelope.salt.len() != SALT_LEN || password.is_empty() {
        return Err(VaultError::DecryptionFailed);
    }
    let iv: [u8; NONCE_LEN_BYTES] = envelope
        .iv
        .as_slice()
        .try_into()
        .map_err(|_| VaultError::DecryptionFailed)?;

    let key = crypto::derive_key(password, &envelope.salt, options.iterations)
        .map_err(|_| VaultError::DecryptionFailed)?;
    crypto::decrypt(&iv, &envelope.ciphertext, &key)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn opts() -> EncryptOptions {
        EncryptOptions::default()
    }

    #[test]
    fn encrypt_decrypt_roundtrip_structured_data() {
        let data = serde_json::json!({"note": "meet at 5", "tags": ["work"]});
        let envelope = CryptoVault::encrypt(&data, b"passphrase", &opts()).unwrap();
        let back: serde_json::Value = CryptoVault::decrypt(&envelope, b"passphrase", &opts()).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn same_plaintext_gets_fresh_salt_and_iv() {
        let a = CryptoVault::encrypt("same", b"pw", &opts()).unwrap();
        let b = CryptoVault::encrypt("same", b"pw", &opts()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.iv, b.iv);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn flipping_any_envelope_byte_fails() {
        let envelope = CryptoVault::encrypt("payload", b"pw", &opts()).unwrap();

        let mut bad_ct = envelope.clone();
        bad_ct.ciphertext[0] ^= 0x80;
        let mut bad_iv = envelope.clone();
        bad_iv.iv[3] ^= 0x01;
        let mut bad_salt = envelope.clone();
        bad_salt.salt[15] ^= 0x01;

        for tampered in [bad_ct, bad_iv, bad_salt] {
            let result: Result<String> = CryptoVault::decrypt(&tampered, b"pw", &opts());
            assert!(matches!(result, Err(VaultError::DecryptionFailed)));
        }
    }

    #[test]
    fn wrong_password_matches_corruption_error() {
        let envelope = CryptoVault::encrypt("payload", b"right", &opts()).unwrap();
        let wrong: Result<String> = CryptoVault::decrypt(&envelope, b"wrong", &opts());

        let mut corrupted = envelope.clone();
        corrupted.iv.truncate(4);
        let broken: Result<String> = CryptoVault::decrypt(&corrupted, b"right", &opts());

        assert_eq!(
            wrong.unwrap_err().to_string(),
            broken.unwrap_err().to_string()
        );
    }

    #[test]
    fn items_roundtrip_through_store() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let vault = CryptoVault::new(Arc::clone(&store), "device-passphrase");

        vault.set_item("profile", &vec![1, 2, 3]).unwrap();
        assert!(vault.has_item("profile").unwrap());
        assert_eq!(vault.get_item::<Vec<i32>>("profile"), Some(vec![1, 2, 3]));
        assert_eq!(vault.keys_with_prefix("pro").unwrap(), vec!["profile".to_string()]);

        // The raw store never holds plaintext.
        let raw = store.get("secure:profile").unwrap().unwrap();
        assert!(!raw.contains("[1,2,3]"));

        vault.remove_item("profile").unwrap();
        assert_eq!(vault.get_item::<Vec<i32>>("profile"), None);
    }

    #[test]
    fn get_item_on_corrupt_value_returns_none() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        store.set("secure:broken", "not an envelope").unwrap();
        let vault = CryptoVault::new(store, "pw");
        assert_eq!(vault.get_item::<String>("broken"), None);
        assert_eq!(vault.get_item::<String>("missing"), None);
    }

    #[test]
    fn get_item_with_other_passphrase_returns_none() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        CryptoVault::new(Arc::clone(&store), "first")
            .set_item("k", "v")
            .unwrap();
        let other = CryptoVault::new(store, "second");
        assert_eq!(other.get_item::<String>("k"), None);
    }

    #[tokio::test]
    async fn async_variants_roundtrip() {
        let envelope = CryptoVault::encrypt_async("off-thread", b"pw", opts()).await.unwrap();
        let back: String = CryptoVault::decrypt_async(envelope, b"pw", opts()).await.unwrap();
        assert_eq!(back, "off-thread");
    }
}
