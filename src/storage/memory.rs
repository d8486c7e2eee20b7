//! In-memory storage backend

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::{StorageBackend, StorageError};

/// Storage backend holding items in a process-local map
#[derive(Debug, Default)]
pub struct MemoryStorageBackend {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorageBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.items
            .lock()
            .map_err(|e| StorageError::BackendError(format!("Storage lock poisoned: {}", e)))
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.lock().map(|items| items.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys currently stored, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .lock()
            .map(|items| items.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryStorageBackend {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.lock()?.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.lock()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.lock()?.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_get_remove() {
        let backend = MemoryStorageBackend::new();
        assert_eq!(backend.get_item("a").await.unwrap(), None);

        backend.set_item("a", "1").await.unwrap();
        assert_eq!(backend.get_item("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(backend.len(), 1);

        backend.remove_item("a").await.unwrap();
        backend.remove_item("a").await.unwrap();
        assert!(backend.is_empty());
    }
}
