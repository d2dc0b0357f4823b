//! PIN fallback.
//!
//! Only a salted PBKDF2-HMAC-SHA256 hash of the PIN is kept. Verification
//! uses `ring::pbkdf2::verify`, which compares in constant time.

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use ring::pbkdf2;
use ring::rand::{SecureRandom, SystemRandom};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Shortest accepted PIN.
pub const MIN_PIN_LENGTH: usize = 4;

/// Longest accepted PIN.
pub const MAX_PIN_LENGTH: usize = 64;

/// Default PBKDF2 iteration count for PIN hashes.
pub const DEFAULT_PIN_ITERATIONS: u32 = 100_000;

const SALT_LEN: usize = 16;
const HASH_LEN: usize = 32;

static PBKDF2_ALG: pbkdf2::Algorithm = pbkdf2::PBKDF2_HMAC_SHA256;

/// Persisted PIN verifier. Never contains the PIN itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinRecord {
    pub salt: Vec<u8>,
    pub hash: Vec<u8>,
    pub iterations: u32,
    pub created_at: DateTime<Utc>,
}

impl PinRecord {
    /// Hash `pin` under a fresh random salt.
    ///
    /// # Errors
    ///
    /// [`AuthError::InvalidInput`] when the PIN is shorter than
    /// [`MIN_PIN_LENGTH`], longer than [`MAX_PIN_LENGTH`], or has surrounding
    /// whitespace.
    pub fn create(pin: &str, iterations: u32, created_at: DateTime<Utc>) -> Result<Self> {
        validate(pin)?;

        let mut salt = vec![0u8; SALT_LEN];
        SystemRandom::new()
            .fill(&mut salt)
            .map_err(|_| AuthError::Crypto("failed to generate PIN salt".into()))?;

        let rounds = rounds(iterations)?;
        let mut hash = vec![0u8; HASH_LEN];
        pbkdf2::derive(PBKDF2_ALG, rounds, &salt, pin.as_bytes(), &mut hash);

        Ok(Self {
            salt,
            hash,
            iterations: rounds.get(),
            created_at,
        })
    }

    /// Constant-time check of `pin` against the stored hash.
    pub fn verify(&self, pin: &str) -> bool {
        let Some(rounds) = NonZeroU32::new(self.iterations) else {
            return false;
        };
        pbkdf2::verify(PBKDF2_ALG, rounds, &self.salt, pin.as_bytes(), &self.hash).is_ok()
    }
}

fn validate(pin: &str) -> Result<()> {
    let len = pin.chars().count();
    if len < MIN_PIN_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "PIN must be at least {MIN_PIN_LENGTH} characters"
        )));
    }
    if len > MAX_PIN_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "PIN must be at most {MAX_PIN_LENGTH} characters"
        )));
    }
    if pin.trim() != pin {
        return Err(AuthError::InvalidInput(
            "PIN cannot start or end with whitespace".into(),
        ));
    }
    Ok(())
}

fn rounds(iterations: u32) -> Result<NonZeroU32> {
    NonZeroU32::new(iterations.max(DEFAULT_PIN_ITERATIONS))
        .ok_or_else(|| AuthError::Crypto("PBKDF2 iteration count must be non-zero".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_pin_verifies_wrong_pin_does_not() {
        let record = PinRecord::create("1234", DEFAULT_PIN_ITERATIONS, Utc::now()).unwrap();
        assert!(record.verify("1234"));
        assert!(!record.verify("9999"));
        assert!(!record.verify("12345"));
    }

    #[test]
    fn record_never_holds_plaintext() {
        let record = PinRecord::create("1234", DEFAULT_PIN_ITERATIONS, Utc::now()).unwrap();
        let json = serde_json::to_string(&record).unwrap();
        assert!(!json.contains("\"1234\""));
        assert_ne!(record.hash, b"1234".to_vec());
        assert_eq!(record.hash.len(), 32);
    }

    #[test]
    fn same_pin_gets_distinct_salts() {
        let a = PinRecord::create("2468", DEFAULT_PIN_ITERATIONS, Utc::now()).unwrap();
        let b = PinRecord::create("2468", DEFAULT_PIN_ITERATIONS, Utc::now()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn short_pin_is_rejected() {
        assert!(matches!(
            PinRecord::create("123", DEFAULT_PIN_ITERATIONS, Utc::now()),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(PinRecord::create(" 1234", DEFAULT_PIN_ITERATIONS, Utc::now()).is_err());
    }

    #[test]
    fn low_iteration_counts_are_raised() {
        let record = PinRecord::create("1234", 10, Utc::now()).unwrap();
        assert_eq!(record.iterations, DEFAULT_PIN_ITERATIONS);
        assert!(record.verify("1234"));
    }
}
