//! Local persistent key-value storage.
//!
//! [`FileStorage`] keeps every key in one JSON object on disk so values
//! survive restarts on this device (and only this device). [`MemoryStorage`]
//! is the volatile variant used by tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use tracing::debug;

use crate::providers::{LocalStorage, StorageError};

const STORAGE_FILE: &str = "storage.json";

/// JSON file backed storage in the configured data directory.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: RwLock<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open (or create) the storage file under `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or an existing
    /// file is not a JSON string map.
    pub fn open(dir: &Path) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(STORAGE_FILE);

        let entries = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), "Opened local storage");

        Ok(Self {
            path,
            entries: RwLock::new(entries),
        })
    }

    fn persist(&self, entries: &BTreeMap<String, String>) -> Result<(), StorageError> {
        // Write then rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(entries)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        entries.insert(key.to_owned(), value.to_owned());
        self.persist(&entries)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Poisoned)?;
        if entries.remove(key).is_some() {
            self.persist(&entries)?;
        }
        Ok(())
    }
}

/// Volatile storage.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStorage {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self.entries.read().map_err(|_| StorageError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Poisoned)?
            .remove(key);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use packup_core::{Email, PendingSignIn};
    use rand::Rng;

    use super::*;
    use crate::providers::{read_json, write_json};

    fn scratch_dir() -> PathBuf {
        let suffix: u64 = rand::rng().random();
        std::env::temp_dir().join(format!("packup-storage-{suffix:x}"))
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = scratch_dir();
        let pending = PendingSignIn {
            email: Email::parse("ada@example.com").unwrap(),
            requested_at: Utc::now(),
        };

        {
            let storage = FileStorage::open(&dir).unwrap();
            write_json(&storage, "emailForSignIn", &pending).unwrap();
        }

        let reopened = FileStorage::open(&dir).unwrap();
        let loaded: Option<PendingSignIn> = read_json(&reopened, "emailForSignIn").unwrap();
        assert_eq!(loaded, Some(pending));

        reopened.remove("emailForSignIn").unwrap();
        let reopened = FileStorage::open(&dir).unwrap();
        assert_eq!(reopened.get("emailForSignIn").unwrap(), None);

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(STORAGE_FILE), "not json").unwrap();

        assert!(matches!(
            FileStorage::open(&dir),
            Err(StorageError::Serde(_))
        ));

        std::fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_memory_storage_remove_missing_is_ok() {
        let storage = MemoryStorage::new();
        storage.set("a", "1").unwrap();
        storage.remove("a").unwrap();
        storage.remove("a").unwrap();
        assert_eq!(storage.get("a").unwrap(), None);
    }
}
