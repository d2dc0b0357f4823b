//! File-based key-value store.
//!
//! [`FileStore`] keeps one file per key inside a directory. File names are the
//! URL-safe base64 encoding of the key, so arbitrary keys (including `:` and
//! `/`) map to flat, reversible names. Keys whose encoded name would not fit
//! in a single path component are rejected. On Unix each file is created with
//! mode 0600.

use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;

use crate::error::{Result, VaultError};
use crate::store::KeyValueStore;

/// Extension appended to every value file.
const VALUE_EXT: &str = "kv";

/// Extension of the temporary file written before the rename.
const TMP_EXT: &str = "tmp";

/// Longest file name most filesystems accept, in bytes.
const MAX_FILE_NAME: usize = 255;

/// Directory-backed key-value store.
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Create a store rooted at `dir`, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        tracing::info!(path = %dir.display(), "opened file store");
        Ok(Self { dir })
    }

    /// Default store location: `<data_dir>/store`.
    pub fn default_path(data_dir: &Path) -> PathBuf {
        data_dir.join("store")
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(VaultError::InvalidInput("storage key cannot be empty".into()));
        }
        let name = URL_SAFE_NO_PAD.encode(key.as_bytes());
        if name.len() + 1 + VALUE_EXT.len().max(TMP_EXT.len()) > MAX_FILE_NAME {
            return Err(VaultError::InvalidInput(format!(
                "storage key of {} bytes is too long for the file store",
                key.len()
            )));
        }
        Ok(self.dir.join(format!("{name}.{VALUE_EXT}")))
    }

    fn key_for(path: &Path) -> Option<String> {
        if path.extension().and_then(|e| e.to_str()) != Some(VALUE_EXT) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let bytes = URL_SAFE_NO_PAD.decode(stem).ok()?;
        String::from_utf8(bytes).ok()
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.path_for(key)?;
        match std::fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let path = self.path_for(key)?;

        // Write to a sibling temp file and rename so readers never observe a
        // half-written value.
        let tmp = path.with_extension(TMP_EXT);
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options.open(&tmp)?;

        // A leftover temp file keeps its old mode, so tighten it before writing.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
        }
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        drop(file);

        std::fs::rename(&tmp, &path)?;
        tracing::trace!(key = key, "wrote file store entry");
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if let Some(key) = Self::key_for(&entry.path()) {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_with_awkward_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        store.set("privacy:data/x1", "{\"a\":1}").unwrap();
        store.set("audit_logs", "[]").unwrap();

        assert_eq!(
            store.get("privacy:data/x1").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
        assert_eq!(
            store.keys().unwrap(),
            vec!["audit_logs".to_string(), "privacy:data/x1".to_string()]
        );

        store.remove("privacy:data/x1").unwrap();
        assert_eq!(store.get("privacy:data/x1").unwrap(), None);
        store.remove("privacy:data/x1").unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn files_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.set("secret", "value").unwrap();

        let path = store.path_for("secret").unwrap();
        let mode = std::fs::metadata(path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn stale_temp_file_does_not_widen_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        let tmp = store.path_for("secret").unwrap().with_extension(TMP_EXT);
        std::fs::write(&tmp, "leftover").unwrap();
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

        store.set("secret", "value").unwrap();

        let path = store.path_for("secret").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(store.get("secret").unwrap().as_deref(), Some("value"));
        assert!(!tmp.exists());
    }

    #[test]
    fn overlong_keys_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path()).unwrap();

        let longest = "k".repeat(188);
        store.set(&longest, "fits").unwrap();
        assert_eq!(store.keys().unwrap(), vec![longest.clone()]);

        let too_long = "k".repeat(189);
        assert!(matches!(
            store.set(&too_long, "v"),
            Err(VaultError::InvalidInput(_))
        ));
        assert!(matches!(store.get(&too_long), Err(VaultError::InvalidInput(_))));
    }

    #[test]
    fn foreign_files_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("README.txt"), "hi").unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        assert!(store.keys().unwrap().is_empty());
    }
}
