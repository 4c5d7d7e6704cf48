//! Durable storage for the last-accepted metadata of a repository.
//!
//! The core needs only `get` and `set` keyed by metadata filename
//! (`root.json`, `timestamp.json`, `<N>.root.json`). Anything richer stays
//! behind the trait.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("invalid storage key '{0}'")]
    InvalidKey(String),
    #[error("storage I/O error for '{key}': {message}")]
    Io { key: String, message: String },
}

/// Key-value store holding raw metadata bytes across process runs.
pub trait DurableStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError>;
}

impl<S: DurableStorage + ?Sized> DurableStorage for &S {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        (**self).set(key, bytes)
    }
}

// =============================================================================
// In-memory storage
// =============================================================================

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every entry, for comparing state before and after a refresh.
    pub fn entries(&self) -> HashMap<String, Vec<u8>> {
        self.entries.read().clone()
    }
}

impl DurableStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        self.entries.write().insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

// =============================================================================
// Filesystem storage
// =============================================================================

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::Io {
            key: dir.display().to_string(),
            message: e.to_string(),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if !is_plain_filename(key) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(key))
    }
}

impl DurableStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let path = self.path_for(key)?;
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                message: e.to_string(),
            }),
        }
    }

    fn set(&self, key: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |e: std::io::Error| StorageError::Io {
            key: key.to_string(),
            message: e.to_string(),
        };

        // Write atomically (write to temp file, then rename)
        let temp_path = self.dir.join(format!(".{}.tmp", key));
        std::fs::write(&temp_path, bytes).map_err(io_err)?;
        std::fs::rename(&temp_path, &path).map_err(io_err)?;
        Ok(())
    }
}

pub(crate) fn is_plain_filename(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && !key.starts_with('.')
        && !key.contains(['/', '\\', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_temp_dir(prefix: &str) -> PathBuf {
        let stamp = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("{}_{}_{}", prefix, std::process::id(), stamp))
    }

    #[test]
    fn test_memory_storage_round_trip() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("root.json").unwrap(), None);
        storage.set("root.json", b"{}").unwrap();
        assert_eq!(storage.get("root.json").unwrap(), Some(b"{}".to_vec()));
        assert_eq!(storage.entries().len(), 1);
    }

    #[test]
    fn test_file_storage_round_trip() {
        let dir = create_temp_dir("tuf_file_storage");
        let storage = FileStorage::open(&dir).unwrap();

        assert_eq!(storage.get("timestamp.json").unwrap(), None);
        storage.set("timestamp.json", b"v1").unwrap();
        storage.set("timestamp.json", b"v2").unwrap();
        assert_eq!(storage.get("timestamp.json").unwrap(), Some(b"v2".to_vec()));

        // No temp file is left behind.
        let names: Vec<_> = std::fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["timestamp.json".to_string()]);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_file_storage_rejects_paths() {
        let dir = create_temp_dir("tuf_file_storage_keys");
        let storage = FileStorage::open(&dir).unwrap();
        for key in ["../root.json", "a/b.json", "", "..", ".hidden"] {
            assert_eq!(
                storage.set(key, b"x"),
                Err(StorageError::InvalidKey(key.to_string()))
            );
        }
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_plain_filename() {
        assert!(is_plain_filename("3.root.json"));
        assert!(!is_plain_filename("x\\y"));
    }
}
