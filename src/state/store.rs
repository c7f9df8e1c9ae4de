//! JSON document storage
//!
//! Each concern persists as one JSON document under the metadata directory.
//! Reads and writes of the same document are serialized through a per-file
//! lock so concurrent read-modify-write cycles cannot interleave, and every
//! write lands via write-to-temporary-file-then-atomic-rename so a crash
//! never leaves a half-written document behind.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors that can occur during state persistence
#[derive(Debug, Error)]
pub enum StateError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt state document {file}: {message}")]
    Corrupt { file: String, message: String },
}

/// Per-file-serialized, atomically-written JSON document store
pub struct JsonStore {
    dir: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// The metadata directory this store writes under
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_lock(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("store lock poisoned");
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Reads one document; a missing file is `Ok(None)`, a corrupt file is
    /// [`StateError::Corrupt`]
    pub async fn read<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StateError> {
        let lock = self.file_lock(name);
        let _guard = lock.lock().await;

        let path = self.dir.join(name);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| StateError::Corrupt {
                file: name.to_string(),
                message: err.to_string(),
            })
    }

    /// Writes one document durably: temporary file first, then atomic rename
    pub async fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<(), StateError> {
        let lock = self.file_lock(name);
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.dir.join(name);
        let tmp_path = self.dir.join(format!("{}.tmp", name));
        let json = serde_json::to_vec_pretty(value)?;

        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &path).await?;
        Ok(())
    }

    /// Removes one document; missing files are not an error
    pub async fn remove(&self, name: &str) -> Result<(), StateError> {
        let lock = self.file_lock(name);
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(self.dir.join(name)).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
