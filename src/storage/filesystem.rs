//! File system storage backend
//!
//! Implements StorageBackend with one file per key under a base directory.
//! Used by native apps that want the schema cache to survive restarts.
//!
//! ## Security
//!
//! Keys are free-form (they contain `:`, `|`, `$` and `/`), so they are never
//! used as paths directly. Each key is percent-encoded into a single flat file
//! name, which keeps every file inside the base directory.

use super::{StorageBackend, StorageError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Maximum encoded file name length accepted by common file systems
const MAX_FILE_NAME_LENGTH: usize = 255;

/// File system storage backend
pub struct FileSystemStorageBackend {
    base_path: PathBuf,
}

impl FileSystemStorageBackend {
    /// Create a new file system storage backend
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory holding one file per stored key. It is
    ///   created on first write.
    ///
    /// # Example
    ///
    /// ```rust
    /// use campaign_sdk_core::storage::filesystem::FileSystemStorageBackend;
    ///
    /// let backend = FileSystemStorageBackend::new("/var/cache/campaign");
    /// ```
    pub fn new(base_path: impl AsRef<Path>) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Map a key to its file inside the base directory
    fn resolve_path(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() {
            return Err(StorageError::PermissionDenied(
                "Storage key cannot be empty".to_string(),
            ));
        }

        let file_name = encode_key(key);
        if file_name.len() > MAX_FILE_NAME_LENGTH {
            return Err(StorageError::PermissionDenied(format!(
                "Storage key too long (max {} encoded characters)",
                MAX_FILE_NAME_LENGTH
            )));
        }

        Ok(self.base_path.join(file_name))
    }
}

/// Percent-encode everything outside `[A-Za-z0-9._-]`, and a leading `.`
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for (index, byte) in key.bytes().enumerate() {
        let safe = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && index > 0);
        if safe {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

#[async_trait]
impl StorageBackend for FileSystemStorageBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let full_path = self.resolve_path(key)?;

        match fs::read_to_string(&full_path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::IoError(format!(
                "Failed to read item {}: {}",
                key, e
            ))),
        }
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let full_path = self.resolve_path(key)?;

        fs::create_dir_all(&self.base_path).await.map_err(|e| {
            StorageError::IoError(format!(
                "Failed to create storage directory {}: {}",
                self.base_path.display(),
                e
            ))
        })?;

        fs::write(&full_path, value)
            .await
            .map_err(|e| StorageError::IoError(format!("Failed to write item {}: {}", key, e)))?;
        debug!("Persisted item {} to {}", key, full_path.display());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let full_path = self.resolve_path(key)?;

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::IoError(format!(
                "Failed to remove item {}: {}",
                key, e
            ))),
        }
    }
}
