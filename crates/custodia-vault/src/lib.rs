//! Encryption vault for Custodia.
//!
//! This crate provides passphrase-based envelope encryption and the
//! key-value persistence layer every other Custodia service writes through.
//!
//! # Modules
//!
//! - [`crypto`] — AES-256-GCM encryption/decryption, PBKDF2 key derivation.
//! - [`envelope`] — the JSON wire format of one encryption call.
//! - [`vault`] — [`CryptoVault`]: encrypt/decrypt and encrypted item storage.
//! - [`store`] — the [`KeyValueStore`] contract plus memory and SQLite backends.
//! - [`file`] — directory-backed [`FileStore`].
//! - [`password`] — secure password generation and strength scoring.
//! - [`error`] — Unified error types.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use custodia_vault::{CryptoVault, EncryptOptions, MemoryStore};
//!
//! # fn example() -> custodia_vault::Result<()> {
//! let envelope = CryptoVault::encrypt("hello", b"passphrase", &EncryptOptions::default())?;
//! let back: String = CryptoVault::decrypt(&envelope, b"passphrase", &EncryptOptions::default())?;
//! assert_eq!(back, "hello");
//!
//! let vault = CryptoVault::new(Arc::new(MemoryStore::new()), "device-passphrase");
//! vault.set_item("notes", &vec!["a", "b"])?;
//! let notes: Option<Vec<String>> = vault.get_item("notes");
//! # Ok(())
//! # }
//! ```

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod file;
pub mod password;
pub mod store;
pub mod vault;

// Re-export the most commonly used types at the crate root for convenience.
pub use envelope::Envelope;
pub use error::{Result, VaultError};
pub use file::FileStore;
pub use password::{PasswordStrength, generate_secure_password, verify_password_strength};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
pub use vault::{CryptoVault, EncryptOptions};
