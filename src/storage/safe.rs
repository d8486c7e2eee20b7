//! Fault-tolerant storage decorator
//!
//! Wraps a [`StorageBackend`] so that every failure degrades to "absent":
//! read errors become misses, write and remove errors are logged and dropped,
//! and a stored value that fails to decode is evicted on the spot.

use std::sync::Arc;

use tracing::{debug, warn};

use super::StorageBackend;

/// Storage accessor that never fails
#[derive(Clone)]
pub struct SafeStorage {
    inner: Arc<dyn StorageBackend>,
}

impl SafeStorage {
    pub fn new(inner: Arc<dyn StorageBackend>) -> Self {
        Self { inner }
    }

    /// Raw read; any backend error reads as `None`
    pub async fn get_item(&self, key: &str) -> Option<String> {
        match self.inner.get_item(key).await {
            Ok(value) => value,
            Err(e) => {
                warn!("Storage read of {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Read and decode an item, evicting it if decoding fails
    pub async fn get_decoded<T, E, F>(&self, key: &str, decode: F) -> Option<T>
    where
        F: FnOnce(&str) -> Result<T, E>,
        E: std::fmt::Display,
    {
        let raw = self.get_item(key).await?;
        match decode(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Evicting undecodable storage item {}: {}", key, e);
                self.remove_item(key).await;
                None
            }
        }
    }

    pub async fn set_item(&self, key: &str, value: &str) {
        if let Err(e) = self.inner.set_item(key, value).await {
            warn!("Storage write of {} failed: {}", key, e);
        }
    }

    pub async fn remove_item(&self, key: &str) {
        match self.inner.remove_item(key).await {
            Ok(()) => debug!("Removed storage item {}", key),
            Err(e) => warn!("Storage removal of {} failed: {}", key, e),
        }
    }
}

impl std::fmt::Debug for SafeStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SafeStorage").finish_non_exhaustive()
    }
}
