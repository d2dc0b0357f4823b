//! Low-level primitives: AES-256-GCM and PBKDF2-HMAC-SHA256 via `ring`.
//!
//! [`CryptoVault`](crate::CryptoVault) composes these into envelopes. Every
//! open failure is reported as [`VaultError::DecryptionFailed`] with no
//! detail, so a wrong key and a modified ciphertext are indistinguishable.

use std::num::NonZeroU32;

use ring::aead::{AES_256_GCM, Aad, LessSafeKey, NONCE_LEN, Nonce, UnboundKey};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, VaultError};

/// AES-256 key size.
pub const KEY_LEN: usize = 32;

/// GCM nonce size, 96 bits.
pub const NONCE_LEN_BYTES: usize = NONCE_LEN;

/// PBKDF2 salt size, 128 bits.
pub const SALT_LEN: usize = 16;

/// GCM tag size. The tag trails the ciphertext.
pub const TAG_LEN: usize = 16;

/// Iteration floor for PBKDF2. Lower requests are raised to it.
pub const MIN_PBKDF2_ITERATIONS: u32 = 100_000;

fn aead_key(key: &[u8]) -> Option<LessSafeKey> {
    if key.len() != KEY_LEN {
        return None;
    }
    UnboundKey::new(&AES_256_GCM, key).ok().map(LessSafeKey::new)
}

/// Seal `plaintext` under `key` with a fresh random nonce.
///
/// Returns the nonce and `ciphertext || tag`.
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<([u8; NONCE_LEN_BYTES], Vec<u8>)> {
    let sealing = aead_key(key).ok_or_else(|| VaultError::EncryptionFailed {
        reason: format!("expected a {KEY_LEN}-byte key, got {} bytes", key.len()),
    })?;
    let nonce: [u8; NONCE_LEN_BYTES] =
        random_array().map_err(|_| VaultError::EncryptionFailed {
            reason: "nonce generation failed".into(),
        })?;

    let mut buf = plaintext.to_vec();
    sealing
        .seal_in_place_append_tag(Nonce::assume_unique_for_key(nonce), Aad::empty(), &mut buf)
        .map_err(|_| VaultError::EncryptionFailed {
            reason: "AES-GCM seal failed".into(),
        })?;

    tracing::trace!(len = buf.len(), "sealed payload");
    Ok((nonce, buf))
}

/// Open `sealed` (`ciphertext || tag`) produced by [`encrypt`].
pub fn decrypt(nonce: &[u8; NONCE_LEN_BYTES], sealed: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if sealed.len() < TAG_LEN {
        return Err(VaultError::DecryptionFailed);
    }
    let opening = aead_key(key).ok_or(VaultError::DecryptionFailed)?;

    let mut buf = sealed.to_vec();
    let opened = opening
        .open_in_place(Nonce::assume_unique_for_key(*nonce), Aad::empty(), &mut buf)
        .map_err(|_| VaultError::DecryptionFailed)?;
    let len = opened.len();
    buf.truncate(len);

    tracing::trace!(len, "opened payload");
    Ok(buf)
}

/// PBKDF2-HMAC-SHA256 of `password` under `salt`.
///
/// # Errors
///
/// [`VaultError::KeyDerivationFailed`] for an empty password.
pub fn derive_key(password: &[u8], salt: &[u8], iterations: u32) -> Result<[u8; KEY_LEN]> {
    if password.is_empty() {
        return Err(VaultError::KeyDerivationFailed {
            reason: "empty passphrase".into(),
        });
    }
    let rounds = NonZeroU32::new(iterations.max(MIN_PBKDF2_ITERATIONS)).unwrap_or(NonZeroU32::MIN);

    let mut derived = [0u8; KEY_LEN];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, rounds, salt, password, &mut derived);
    Ok(derived)
}

/// `len` bytes from the system CSPRNG.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let mut out = vec![0u8; len];
    fill_random(&mut out)?;
    Ok(out)
}

/// A random array of `N` bytes.
pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

fn fill_random(out: &mut [u8]) -> Result<()> {
    SystemRandom::new()
        .fill(out)
        .map_err(|_| VaultError::Internal("system random source unavailable".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_bytes_open_with_the_same_key() {
        let key = random_bytes(KEY_LEN).unwrap();
        let message = b"meet at the usual place";

        let (nonce, sealed) = encrypt(message, &key).unwrap();
        assert_eq!(sealed.len(), message.len() + TAG_LEN);
        assert_eq!(decrypt(&nonce, &sealed, &key).unwrap(), message);
    }

    #[test]
    fn wrong_key_and_tampering_fail_identically() {
        let right = random_bytes(KEY_LEN).unwrap();
        let other = random_bytes(KEY_LEN).unwrap();

        let (nonce, mut sealed) = encrypt(b"account 0042", &right).unwrap();
        let wrong_key = decrypt(&nonce, &sealed, &other);

        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        let tampered = decrypt(&nonce, &sealed, &right);

        assert!(matches!(wrong_key, Err(VaultError::DecryptionFailed)));
        assert!(matches!(tampered, Err(VaultError::DecryptionFailed)));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let key = random_bytes(KEY_LEN).unwrap();
        let nonce = [0u8; NONCE_LEN_BYTES];
        assert!(matches!(
            decrypt(&nonce, &[1, 2, 3], &key),
            Err(VaultError::DecryptionFailed)
        ));
    }

    #[test]
    fn short_key_is_an_encryption_error() {
        assert!(matches!(
            encrypt(b"x", &[0u8; 16]),
            Err(VaultError::EncryptionFailed { .. })
        ));
    }

    #[test]
    fn pbkdf2_deterministic_and_salted() {
        let salt1 = [1u8; SALT_LEN];
        let salt2 = [2u8; SALT_LEN];

        let a = derive_key(b"my-password", &salt1, MIN_PBKDF2_ITERATIONS).unwrap();
        let b = derive_key(b"my-password", &salt1, MIN_PBKDF2_ITERATIONS).unwrap();
        let c = derive_key(b"my-password", &salt2, MIN_PBKDF2_ITERATIONS).unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn low_iteration_requests_are_raised_to_floor() {
        let salt = [7u8; SALT_LEN];
        let low = derive_key(b"pw", &salt, 1).unwrap();
        let floor = derive_key(b"pw", &salt, MIN_PBKDF2_ITERATIONS).unwrap();
        assert_eq!(low, floor);
    }

    #[test]
    fn empty_password_rejected() {
        let result = derive_key(b"", &[0u8; SALT_LEN], MIN_PBKDF2_ITERATIONS);
        assert!(matches!(result, Err(VaultError::KeyDerivationFailed { .. })));
    }

    #[test]
    fn each_call_draws_a_new_nonce() {
        let key = random_bytes(KEY_LEN).unwrap();
        let (n1, c1) = encrypt(b"same", &key).unwrap();
        let (n2, c2) = encrypt(b"same", &key).unwrap();
        assert_ne!(n1, n2);
        assert_ne!(c1, c2);
    }
}
