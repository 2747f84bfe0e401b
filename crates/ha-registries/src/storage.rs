//! Versioned JSON persistence in the `.storage/` directory
//!
//! Every persisted collection (config entries, devices, entities) is one file
//! named after its storage key, wrapped in a version envelope:
//!
//! ```json
//! {
//!   "version": 1,
//!   "minor_version": 12,
//!   "key": "core.device_registry",
//!   "data": { ... }
//! }
//! ```

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage key mismatch: file {path:?} holds {found}, expected {expected}")]
    KeyMismatch {
        path: PathBuf,
        expected: String,
        found: String,
    },

    #[error("Storage {key} was written by a newer version ({found} > {supported})")]
    UnsupportedVersion {
        key: String,
        supported: u32,
        found: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Version envelope around persisted data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version, bumped on breaking layout changes
    pub version: u32,
    /// Minor version, bumped on additive changes
    pub minor_version: u32,
    /// Storage key (file name)
    pub key: String,
    pub data: T,
}

/// A collection that lives in its own storage file
pub trait Storable: Serialize + DeserializeOwned {
    /// Storage key (file name under `.storage/`)
    const KEY: &'static str;
    /// Current major version
    const VERSION: u32;
    /// Current minor version
    const MINOR_VERSION: u32;
}

/// Handle on a config directory's `.storage/` folder
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Create a storage handle for the given config directory
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    /// Path of the `.storage/` directory
    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Path of the file backing a storage key
    pub fn file_path(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Check whether a storage key has been written
    pub fn exists(&self, key: &str) -> bool {
        self.file_path(key).exists()
    }

    /// Load a collection, returning `None` when it was never saved.
    ///
    /// Files with an older major version are accepted (serde defaults fill
    /// missing fields); files from a newer major version are refused.
    pub async fn load<T: Storable>(&self) -> StorageResult<Option<StorageFile<T>>> {
        let path = self.file_path(T::KEY);
        if !path.exists() {
            debug!("Storage file not found: {}", T::KEY);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let file: StorageFile<T> = serde_json::from_str(&content)?;

        if file.key != T::KEY {
            return Err(StorageError::KeyMismatch {
                path,
                expected: T::KEY.to_string(),
                found: file.key,
            });
        }
        if file.version > T::VERSION {
            return Err(StorageError::UnsupportedVersion {
                key: T::KEY.to_string(),
                supported: T::VERSION,
                found: file.version,
            });
        }
        if file.version < T::VERSION || file.minor_version < T::MINOR_VERSION {
            warn!(
                "Storage {} is at v{}.{}, will be rewritten as v{}.{} on next save",
                T::KEY,
                file.version,
                file.minor_version,
                T::VERSION,
                T::MINOR_VERSION
            );
        }

        debug!(
            "Loaded storage file: {} (v{}.{})",
            T::KEY,
            file.version,
            file.minor_version
        );
        Ok(Some(file))
    }

    /// Save a collection at its current version.
    ///
    /// The file is written to `<key>.tmp` first and renamed into place.
    pub async fn save<T: Storable>(&self, data: &T) -> StorageResult<()> {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
            debug!("Created storage directory: {:?}", self.storage_dir);
        }

        let envelope = StorageFile {
            version: T::VERSION,
            minor_version: T::MINOR_VERSION,
            key: T::KEY.to_string(),
            data,
        };
        let content = serde_json::to_string_pretty(&envelope)?;

        let path = self.file_path(T::KEY);
        let temp_path = self.file_path(&format!("{}.tmp", T::KEY));
        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            "Saved storage file: {} (v{}.{})",
            T::KEY,
            T::VERSION,
            T::MINOR_VERSION
        );
        Ok(())
    }
}
