//! Generic key-value persistence.
//!
//! Every Custodia service persists through [`KeyValueStore`], a key to
//! opaque-string map with get / set / remove / enumerate. Any conforming
//! backing store satisfies the contract:
//!
//! - [`MemoryStore`] — process-local map, used by tests and ephemeral sessions.
//! - [`SqliteStore`] — a single `kv` table in a WAL-mode SQLite database.
//! - [`FileStore`](crate::file::FileStore) — one file per key in a directory.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, RwLock};

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, params};

use crate::error::{Result, VaultError};

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Abstraction over a key to opaque-string store.
///
/// Implementations must be `Send + Sync` so services can be shared across
/// async tasks.
pub trait KeyValueStore: Send + Sync {
    /// Fetch the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store (or overwrite) `value` under `key`.
    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// Enumerate every stored key.
    fn keys(&self) -> Result<Vec<String>>;
}

fn check_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VaultError::InvalidInput("storage key cannot be empty".into()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

/// Process-local store backed by a `HashMap`.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create an empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn poisoned(e: impl std::fmt::Display) -> VaultError {
        VaultError::Storage {
            reason: format!("memory store lock poisoned: {e}"),
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.read().map_err(Self::poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        let mut entries = self.entries.write().map_err(Self::poisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.write().map_err(Self::poisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = self.entries.read().map_err(Self::poisoned)?;
        let mut keys: Vec<String> = entries.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

// ---------------------------------------------------------------------------
// SQLite backend
// ---------------------------------------------------------------------------

/// Key-value store backed by SQLite.
///
/// The connection is wrapped in a `Mutex` because `rusqlite::Connection` is
/// not `Sync`. Each operation holds the lock briefly.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) a store database at `path`.
    ///
    /// Runs schema migrations automatically.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening key-value database");

        let conn = Connection::open(path)?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_connection(&conn)?;
        Self::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Configure SQLite pragmas for performance and safety.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        tracing::debug!("running key-value schema migrations");
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key        TEXT PRIMARY KEY,
                value      TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )?;
        Ok(())
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock().map_err(|e| VaultError::Storage {
            reason: format!("sqlite connection lock poisoned: {e}"),
        })?;
        f(&conn)
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let value = conn
                .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| {
                    row.get::<_, String>(0)
                })
                .optional()?;
            Ok(value)
        })
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        check_key(key)?;
        let now = Utc::now().timestamp_millis();
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO kv (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value,
                                               updated_at = excluded.updated_at",
                params![key, value, now],
            )?;
            Ok(())
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
            Ok(())
        })
    }

    fn keys(&self) -> Result<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT key FROM kv ORDER BY key")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
