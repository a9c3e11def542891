//! Durable Key-Value Storage
//!
//! The session store persists snapshots under a small fixed set of keys.
//! Values are JSON text. A missing or unreadable value is never fatal: the
//! reader falls back to an in-memory default and logs a warning.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from the storage layer
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem access failed
    #[error("storage I/O failed at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// A value could not be serialized
    #[error("failed to serialize {key}: {source}")]
    Serialize {
        /// Key being written
        key: StorageKey,
        /// The underlying serde error
        source: serde_json::Error,
    },
}

/// Fixed storage keys
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Runtime settings
    Settings,
    /// Every conversation
    Conversations,
    /// Manually recorded model capabilities
    ModelCapabilities,
    /// Cached live model details
    ModelDetails,
    /// Id of the last current conversation
    ActiveConversation,
}

impl StorageKey {
    /// Every key, in a stable order
    pub const ALL: [StorageKey; 5] = [
        Self::Settings,
        Self::Conversations,
        Self::ModelCapabilities,
        Self::ModelDetails,
        Self::ActiveConversation,
    ];

    /// Key name as stored
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Settings => "settings",
            Self::Conversations => "conversations",
            Self::ModelCapabilities => "model-capabilities",
            Self::ModelDetails => "model-details",
            Self::ActiveConversation => "active-conversation",
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimal key-value CRUD over JSON text
pub trait KeyValueStore: Send + Sync {
    /// Read a value; `Ok(None)` when absent
    ///
    /// # Errors
    ///
    /// Backend-specific read failure.
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one
    ///
    /// # Errors
    ///
    /// Backend-specific write failure.
    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError>;

    /// Delete a value; absent keys are fine
    ///
    /// # Errors
    ///
    /// Backend-specific delete failure.
    fn remove(&self, key: StorageKey) -> Result<(), StorageError>;
}

/// Read and decode a value, falling back to `T::default()` with a warning
pub fn load_or_default<T>(store: &dyn KeyValueStore, key: StorageKey) -> T
where
    T: DeserializeOwned + Default,
{
    match store.get(key) {
        Ok(Some(text)) => match serde_json::from_str(&text) {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Stored value is corrupt, using default");
                T::default()
            }
        },
        Ok(None) => T::default(),
        Err(e) => {
            tracing::warn!(key = %key, error = %e, "Failed to read stored value, using default");
            T::default()
        }
    }
}

/// Encode and write a value
///
/// # Errors
///
/// Serialization or backend failure.
pub fn save<T>(store: &dyn KeyValueStore, key: StorageKey, value: &T) -> Result<(), StorageError>
where
    T: Serialize + ?Sized,
{
    let text =
        serde_json::to_string(value).map_err(|source| StorageError::Serialize { key, source })?;
    store.set(key, &text)
}

// ============================================================================
// In-Memory Store
// ============================================================================

/// Volatile store, for tests and `--ephemeral` runs
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<StorageKey, String>>,
}

impl MemoryStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        Ok(self.values.read().get(&key).cloned())
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        self.values.write().insert(key, value.to_string());
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        self.values.write().remove(&key);
        Ok(())
    }
}

// ============================================================================
// File Store
// ============================================================================

/// One JSON file per key under a data directory.
///
/// Writes go to a temp file in the same directory followed by a rename, so a
/// crash mid-write leaves the previous value intact.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Use `dir` as the data directory; it is created on first write
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Data directory
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: StorageKey) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StorageError + '_ {
        move |source| StorageError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: StorageKey) -> Result<Option<String>, StorageError> {
        let path = self.path(key);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(&path)(e)),
        }
    }

    fn set(&self, key: StorageKey, value: &str) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.dir).map_err(Self::io_error(&self.dir))?;

        let path = self.path(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        std::fs::write(&tmp, value).map_err(Self::io_error(&tmp))?;
        std::fs::rename(&tmp, &path).map_err(Self::io_error(&path))?;
        tracing::trace!(key = %key, bytes = value.len(), "Persisted value");
        Ok(())
    }

    fn remove(&self, key: StorageKey) -> Result<(), StorageError> {
        let path = self.path(key);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path)(e)),
        }
    }
}
