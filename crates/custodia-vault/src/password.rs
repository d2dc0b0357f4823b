//! Password generation and strength scoring.

use serde::{Deserialize, Serialize};

use crate::crypto;
use crate::error::{Result, VaultError};

const LOWERCASE: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const UPPERCASE: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &[u8] = b"0123456789";
const SYMBOLS: &[u8] = b"!@#$%^&*()-_=+[]{};:,.<>?";

/// Highest score [`verify_password_strength`] reports.
pub const MAX_STRENGTH_SCORE: u8 = 6;

/// Minimum score considered strong.
pub const STRONG_THRESHOLD: u8 = 5;

/// Result of [`verify_password_strength`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordStrength {
    /// Score in `0..=6`.
    pub score: u8,
    /// Human-readable hints for each unmet criterion.
    pub feedback: Vec<String>,
    /// `score >= 5`.
    pub is_strong: bool,
}

/// Generate a random password of `length` characters.
///
/// Draws from lowercase, uppercase, digit and symbol classes; when `length`
/// is at least four, every class is guaranteed to appear.
///
/// # Errors
///
/// Returns [`VaultError::InvalidInput`] for a zero length and
/// [`VaultError::Internal`] if the CSPRNG fails.
pub fn generate_secure_password(length: usize) -> Result<String> {
    if length == 0 {
        return Err(VaultError::InvalidInput("password length must be positive".into()));
    }

    let classes = [LOWERCASE, UPPERCASE, DIGITS, SYMBOLS];
    let alphabet: Vec<u8> = classes.concat();

    let mut out = Vec::with_capacity(length);
    if length >= classes.len() {
        for class in classes {
            out.push(class[random_index(class.len())?]);
        }
    }
    while out.len() < length {
        out.push(alphabet[random_index(alphabet.len())?]);
    }

    // Fisher-Yates so the guaranteed characters are not always up front.
    for i in (1..out.len()).rev() {
        let j = random_index(i + 1)?;
        out.swap(i, j);
    }

    String::from_utf8(out).map_err(|e| VaultError::Internal(e.to_string()))
}

/// Uniform index in `0..bound` using rejection sampling.
fn random_index(bound: usize) -> Result<usize> {
    let bound = u32::try_from(bound)
        .map_err(|_| VaultError::InvalidInput("alphabet too large".into()))?;
    let zone = u32::MAX - (u32::MAX % bound);
    loop {
        let value = u32::from_le_bytes(crypto::random_array()?);
        if value < zone {
            return Ok((value % bound) as usize);
        }
    }
}

/// Score a password.
///
/// +2 for length >= 12 (else +1 for length >= 8), +1 for each of lowercase,
/// uppercase, digit and special characters, +1 when no character repeats
/// three or more times in a row. The total saturates at
/// [`MAX_STRENGTH_SCORE`].
pub fn verify_password_strength(password: &str) -> PasswordStrength {
    let mut score: u8 = 0;
    let mut feedback = Vec::new();
    let length = password.chars().count();

    if length >= 12 {
        score += 2;
    } else if length >= 8 {
        score += 1;
        feedback.push("Use at least 12 characters".to_string());
    } else {
        feedback.push("Use at least 8 characters".to_string());
    }

    let checks: [(bool, &str); 4] = [
        (password.chars().any(|c| c.is_lowercase()), "Add lowercase letters"),
        (password.chars().any(|c| c.is_uppercase()), "Add uppercase letters"),
        (password.chars().any(|c| c.is_ascii_digit()), "Add numbers"),
        (
            password.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()),
            "Add special characters",
        ),
    ];
    for (present, hint) in checks {
        if present {
            score += 1;
        } else {
            feedback.push(hint.to_string());
        }
    }

    if has_repeated_run(password, 3) {
        feedback.push("Avoid repeating the same character".to_string());
    } else {
        score += 1;
    }

    let score = score.min(MAX_STRENGTH_SCORE);
    PasswordStrength {
        score,
        feedback,
        is_strong: score >= STRONG_THRESHOLD,
    }
}

fn has_repeated_run(s: &str, run: usize) -> bool {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(run).any(|w| w.iter().all(|c| *c == w[0]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weak_password_scores_low() {
        let strength = verify_password_strength("abc");
        assert!(strength.score <= 2);
        assert!(!strength.is_strong);
        assert!(strength.feedback.iter().any(|f| f.contains("8 characters")));
    }

    #[test]
    fn strong_password_scores_high() {
        let strength = verify_password_strength("Tr0ub4dor&3-Long!");
        assert!(strength.is_strong);
        assert_eq!(strength.score, MAX_STRENGTH_SCORE);
    }

    #[test]
    fn repeated_run_costs_a_point() {
        let clean = verify_password_strength("Abcdef1!");
        let repeated = verify_password_strength("Aaaaef1!");
        assert_eq!(clean.score, repeated.score + 1);
    }

    #[test]
    fn generated_password_has_every_class() {
        let pw = generate_secure_password(16).unwrap();
        assert_eq!(pw.len(), 16);
        assert!(pw.bytes().any(|b| LOWERCASE.contains(&b)));
        assert!(pw.bytes().any(|b| UPPERCASE.contains(&b)));
        assert!(pw.bytes().any(|b| DIGITS.contains(&b)));
        assert!(pw.bytes().any(|b| SYMBOLS.contains(&b)));
    }

    #[test]
    fn generated_passwords_differ() {
        let a = generate_secure_password(24).unwrap();
        let b = generate_secure_password(24).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn zero_length_rejected() {
        assert!(generate_secure_password(0).is_err());
    }
}
