//! Local persistent key-value storage interface.

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Errors from local storage.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("storage lock poisoned")]
    Poisoned,
}

/// String key-value storage that survives restarts on this device only.
pub trait LocalStorage: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// Read a JSON value stored under `key`.
///
/// # Errors
///
/// Returns an error if the storage fails or the stored value does not decode.
pub fn read_json<T, S>(storage: &S, key: &str) -> Result<Option<T>, StorageError>
where
    T: DeserializeOwned,
    S: LocalStorage + ?Sized,
{
    storage
        .get(key)?
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(StorageError::from)
}

/// Store `value` as JSON under `key`.
///
/// # Errors
///
/// Returns an error if serialisation or the storage fails.
pub fn write_json<T, S>(storage: &S, key: &str, value: &T) -> Result<(), StorageError>
where
    T: Serialize,
    S: LocalStorage + ?Sized,
{
    storage.set(key, &serde_json::to_string(value)?)
}
