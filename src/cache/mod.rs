//! Caching framework
//!
//! [`TtlCache`] is the generic key/value cache: an in-memory map in front of
//! an optional persistent [`StorageBackend`], with per-entry expiry and an
//! O(1) "clear" implemented as a watermark timestamp. The specialized caches
//! wrap it with their own key shapes and value codecs:
//! - [`SchemaCache`]: parsed schemas keyed by (entity type, schema id)
//! - [`MethodCache`]: method definitions and dispatch urns
//! - [`OptionCache`]: server option values with typed access
//! - [`MetadataCache`]: small bookkeeping values (refresher watermarks)

pub mod clock;
pub mod metadata;
pub mod method;
pub mod option;
pub mod schema;
pub mod ttl;

use std::sync::Arc;

use chrono::Duration;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::storage::StorageBackend;

pub use clock::{Clock, ManualClock, SystemClock};
pub use metadata::MetadataCache;
pub use method::{MethodCache, MethodDefinition, MethodParameter, ParameterDirection};
pub use option::{OptionCache, OptionType, OptionValue};
pub use schema::{SCHEMA_ENTITY_TYPE, SchemaCache};
pub use ttl::{CacheEntry, KeyBuilder, TtlCache};

/// Default time-to-live for cached schemas, methods and options
pub const DEFAULT_TTL_SECS: i64 = 300;

/// Default root for persistent storage keys
pub const DEFAULT_STORAGE_ROOT: &str = "campaign.sdk";

/// Error type for cache value encoding
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    #[error("Failed to encode cache value: {0}")]
    Encode(String),
    #[error("Failed to decode cache value: {0}")]
    Decode(String),
}

/// Converts cache values to and from their persisted text form
pub trait ValueCodec<V>: Send + Sync {
    fn encode(&self, value: &V) -> Result<String, CacheError>;
    fn decode(&self, raw: &str) -> Result<V, CacheError>;
}

/// Codec for any serde-serializable value
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl<V: Serialize + DeserializeOwned> ValueCodec<V> for JsonCodec {
    fn encode(&self, value: &V) -> Result<String, CacheError> {
        serde_json::to_string(value).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<V, CacheError> {
        serde_json::from_str(raw).map_err(|e| CacheError::Decode(e.to_string()))
    }
}

/// Settings shared by every cache owned by one client session
#[derive(Clone)]
pub struct CacheOptions {
    /// Entry lifetime; `None` means entries only go away on clear/remove
    pub ttl: Option<Duration>,
    /// Optional persistent backing store
    pub storage: Option<Arc<dyn StorageBackend>>,
    /// Prefix for every persisted key
    pub storage_root: String,
    pub clock: Arc<dyn Clock>,
}

impl CacheOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_storage(mut self, storage: Arc<dyn StorageBackend>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_storage_root(mut self, root: impl Into<String>) -> Self {
        self.storage_root = root.into();
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            ttl: Some(Duration::seconds(DEFAULT_TTL_SECS)),
            storage: None,
            storage_root: DEFAULT_STORAGE_ROOT.to_string(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("persistent", &self.storage.is_some())
            .field("storage_root", &self.storage_root)
            .finish()
    }
}
