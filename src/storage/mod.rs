//! Persistent storage abstraction
//!
//! Defines the StorageBackend trait used to back caches with persistent
//! storage, and the implementations shipped with the SDK:
//! - MemoryStorageBackend: process-local map (tests, ephemeral sessions)
//! - FileSystemStorageBackend: one file per key (native apps)
//!
//! Caches never talk to a backend directly; they go through [`SafeStorage`],
//! which absorbs backend faults and evicts undecodable entries.

use async_trait::async_trait;

pub mod memory;
pub mod safe;

#[cfg(feature = "native-fs")]
pub mod filesystem;

pub use memory::MemoryStorageBackend;
pub use safe::SafeStorage;

/// Error type for storage operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    #[error("Storage backend error: {0}")]
    BackendError(String),
}

/// Trait for persistent key/value storage backends
///
/// Implementations may be synchronous underneath; the async surface lets
/// remote or IO-bound stores plug in without blocking callers. Every method
/// may fail; callers in this crate treat any failure as a cache miss.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the value stored under `key`, `None` if absent
    async fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Store `value` under `key`, replacing any previous value
    async fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Remove `key`; removing an absent key is not an error
    async fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}
