//! Generic TTL cache with optional persistent backing
//!
//! Reads check the in-memory map first and fall back to persistent storage.
//! `clear()` never walks storage: it empties memory and records a
//! `lastCleared` watermark; any entry cached before the watermark is treated
//! as absent and evicted when next read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheError, CacheOptions, Clock, ValueCodec};
use crate::storage::SafeStorage;

/// Joins multi-part keys into one cache key
pub type KeyBuilder = Arc<dyn Fn(&[&str]) -> String + Send + Sync>;

/// Default key builder: single parts are used as-is, others joined with `|`
pub fn default_key_builder() -> KeyBuilder {
    Arc::new(|parts: &[&str]| parts.join("|"))
}

/// A cached value with its timestamps
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
    pub key: String,
    pub value: V,
    pub cached_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| now >= expires_at)
    }

    /// Entries cached at or before the last clear are stale
    pub fn is_stale(&self, last_cleared: Option<DateTime<Utc>>) -> bool {
        last_cleared.is_some_and(|cleared| self.cached_at <= cleared)
    }
}

/// Persisted form of an entry; the value is already codec-encoded
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedEntry {
    value: String,
    cached_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy)]
enum Watermark {
    Unloaded,
    Loaded(Option<DateTime<Utc>>),
}

/// Key/value cache with expiry and O(1) clear
pub struct TtlCache<V> {
    name: String,
    ttl: Option<Duration>,
    storage: Option<SafeStorage>,
    storage_prefix: String,
    codec: Arc<dyn ValueCodec<V>>,
    key_builder: KeyBuilder,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry<V>>>,
    last_cleared: Mutex<Watermark>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    /// Create a cache named `name` using the session-wide options
    pub fn new(name: impl Into<String>, codec: Arc<dyn ValueCodec<V>>, options: &CacheOptions) -> Self {
        let name = name.into();
        Self {
            storage_prefix: format!("{}.{}", options.storage_root, name),
            name,
            ttl: options.ttl,
            storage: options.storage.clone().map(SafeStorage::new),
            codec,
            key_builder: default_key_builder(),
            clock: options.clock.clone(),
            entries: Mutex::new(HashMap::new()),
            last_cleared: Mutex::new(Watermark::Unloaded),
        }
    }

    pub fn with_key_builder(mut self, key_builder: KeyBuilder) -> Self {
        self.key_builder = key_builder;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn is_persistent(&self) -> bool {
        self.storage.is_some()
    }

    pub fn build_key(&self, parts: &[&str]) -> String {
        match parts {
            [single] => (*single).to_string(),
            _ => (self.key_builder)(parts),
        }
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}${}", self.storage_prefix, key)
    }

    fn watermark_key(&self) -> String {
        format!("{}.lastCleared", self.storage_prefix)
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Time of the last `clear()`, loading it from storage on first use
    pub async fn last_cleared(&self) -> Option<DateTime<Utc>> {
        let current = *self.last_cleared.lock().unwrap_or_else(PoisonError::into_inner);
        if let Watermark::Loaded(value) = current {
            return value;
        }

        let loaded = match &self.storage {
            Some(storage) => {
                storage
                    .get_decoded(&self.watermark_key(), |raw| {
                        DateTime::parse_from_rfc3339(raw).map(|t| t.with_timezone(&Utc))
                    })
                    .await
            }
            None => None,
        };

        let mut watermark = self.last_cleared.lock().unwrap_or_else(PoisonError::into_inner);
        match *watermark {
            // A concurrent clear() won the race; keep its value
            Watermark::Loaded(value) => value,
            Watermark::Unloaded => {
                *watermark = Watermark::Loaded(loaded);
                loaded
            }
        }
    }

    /// Look up a value
    pub async fn get(&self, parts: &[&str]) -> Option<V> {
        self.get_entry(parts).await.map(|entry| entry.value)
    }

    /// Look up an entry with its timestamps
    pub async fn get_entry(&self, parts: &[&str]) -> Option<CacheEntry<V>> {
        let key = self.build_key(parts);
        let now = self.clock.now();
        let last_cleared = self.last_cleared().await;

        let cached = self.entries().get(&key).cloned();
        if let Some(entry) = cached {
            if entry.is_expired(now) || entry.is_stale(last_cleared) {
                debug!("Cache {}: evicting expired entry {}", self.name, key);
                self.remove(&key).await;
                return None;
            }
            return Some(entry);
        }

        let storage = self.storage.as_ref()?;
        let storage_key = self.storage_key(&key);
        let (persisted, value) = storage
            .get_decoded(&storage_key, |raw| {
                let persisted: PersistedEntry = serde_json::from_str(raw)
                    .map_err(|e| CacheError::Decode(e.to_string()))?;
                let value = self.codec.decode(&persisted.value)?;
                Ok::<_, CacheError>((persisted, value))
            })
            .await?;

        let entry = CacheEntry {
            key: key.clone(),
            value,
            cached_at: persisted.cached_at,
            expires_at: persisted.expires_at,
        };
        if entry.is_expired(now) || entry.is_stale(last_cleared) {
            debug!("Cache {}: evicting stale persisted entry {}", self.name, key);
            storage.remove_item(&storage_key).await;
            return None;
        }

        debug!("Cache {}: loaded {} from storage", self.name, key);
        self.entries().insert(key, entry.clone());
        Some(entry)
    }

    /// Store a value, returning the new entry
    pub async fn put(&self, parts: &[&str], value: V) -> CacheEntry<V> {
        let key = self.build_key(parts);
        let mut cached_at = self.clock.now();
        // Writes after a clear must never look stale, even on a coarse clock
        if let Some(cleared) = self.last_cleared().await
            && cached_at <= cleared
        {
            cached_at = cleared + Duration::microseconds(1);
        }
        let entry = CacheEntry {
            key: key.clone(),
            value,
            cached_at,
            expires_at: self.ttl.map(|ttl| cached_at + ttl),
        };
        self.entries().insert(key.clone(), entry.clone());

        if let Some(storage) = &self.storage {
            match self.codec.encode(&entry.value) {
                Ok(encoded) => {
                    let persisted = PersistedEntry {
                        value: encoded,
                        cached_at: entry.cached_at,
                        expires_at: entry.expires_at,
                    };
                    match serde_json::to_string(&persisted) {
                        Ok(raw) => storage.set_item(&self.storage_key(&key), &raw).await,
                        Err(e) => debug!("Cache {}: not persisting {}: {}", self.name, key, e),
                    }
                }
                Err(e) => debug!("Cache {}: not persisting {}: {}", self.name, key, e),
            }
        }
        entry
    }

    /// Remove one entry by its built key
    pub async fn remove(&self, key: &str) {
        self.entries().remove(key);
        if let Some(storage) = &self.storage {
            storage.remove_item(&self.storage_key(key)).await;
        }
    }

    /// Remove every in-memory entry whose key matches, returning the keys removed
    ///
    /// Persisted entries that were never loaded into memory are not visited.
    pub async fn remove_matching<F>(&self, predicate: F) -> Vec<String>
    where
        F: Fn(&str) -> bool + Send,
    {
        let keys: Vec<String> = self
            .entries()
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &keys {
            self.remove(key).await;
        }
        keys
    }

    /// Drop everything: O(1) regardless of storage size
    pub async fn clear(&self) {
        let previous = self.last_cleared().await;
        self.entries().clear();
        let mut now = self.clock.now();
        // Must cover entries whose timestamp was bumped past the previous clear
        if let Some(previous) = previous
            && now <= previous
        {
            now = previous + Duration::microseconds(1);
        }
        *self.last_cleared.lock().unwrap_or_else(PoisonError::into_inner) = Watermark::Loaded(Some(now));
        if let Some(storage) = &self.storage {
            storage.set_item(&self.watermark_key(), &now.to_rfc3339()).await;
        }
        debug!("Cache {}: cleared at {}", self.name, now);
    }

    /// Keys currently held in memory (possibly including expired ones)
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Live in-memory entries whose key starts with `prefix`
    pub fn entries_with_prefix(&self, prefix: &str) -> Vec<CacheEntry<V>> {
        let now = self.clock.now();
        let mut entries: Vec<CacheEntry<V>> = self
            .entries()
            .values()
            .filter(|entry| entry.key.starts_with(prefix) && !entry.is_expired(now))
            .cloned()
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("name", &self.name)
            .field("ttl", &self.ttl)
            .field("persistent", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{JsonCodec, ManualClock};
    use crate::storage::{MemoryStorageBackend, StorageBackend};

    fn cache_with(
        clock: Arc<ManualClock>,
        storage: Option<Arc<MemoryStorageBackend>>,
    ) -> TtlCache<String> {
        let mut options = CacheOptions::new().with_clock(clock);
        if let Some(storage) = storage {
            options = options.with_storage(storage);
        }
        TtlCache::new("test", Arc::new(JsonCodec), &options)
    }

    #[tokio::test]
    async fn test_multi_part_keys() {
        let cache = cache_with(Arc::new(ManualClock::default()), None);
        assert_eq!(cache.build_key(&["a"]), "a");
        assert_eq!(cache.build_key(&["xtk:schema", "nms:recipient"]), "xtk:schema|nms:recipient");

        cache.put(&["xtk:schema", "nms:recipient"], "v".to_string()).await;
        assert_eq!(
            cache.get(&["xtk:schema|nms:recipient"]).await.as_deref(),
            Some("v")
        );
    }

    #[tokio::test]
    async fn test_custom_key_builder() {
        let cache = cache_with(Arc::new(ManualClock::default()), None)
            .with_key_builder(Arc::new(|parts: &[&str]| parts.join("#")));
        cache.put(&["nms:recipient", "Create"], "m".to_string()).await;
        assert_eq!(cache.keys(), vec!["nms:recipient#Create".to_string()]);
    }

    #[tokio::test]
    async fn test_persisted_entry_survives_new_instance() {
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(MemoryStorageBackend::new());
        let first = cache_with(clock.clone(), Some(storage.clone()));
        first.put(&["k"], "v".to_string()).await;
        assert!(storage.keys().contains(&"campaign.sdk.test$k".to_string()));

        let second = cache_with(clock, Some(storage));
        assert_eq!(second.get(&["k"]).await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_corrupt_persisted_entry_is_evicted() {
        let clock = Arc::new(ManualClock::default());
        let storage = Arc::new(MemoryStorageBackend::new());
        storage.set_item("campaign.sdk.test$k", "{ not json").await.unwrap();

        let cache = cache_with(clock, Some(storage.clone()));
        assert_eq!(cache.get(&["k"]).await, None);
        assert_eq!(storage.get_item("campaign.sdk.test$k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_remove_matching() {
        let cache = cache_with(Arc::new(ManualClock::default()), None);
        cache.put(&["a#1"], "1".to_string()).await;
        cache.put(&["a#2"], "2".to_string()).await;
        cache.put(&["b#1"], "3".to_string()).await;

        let removed = cache.remove_matching(|key| key.starts_with("a#")).await;
        assert_eq!(removed.len(), 2);
        assert_eq!(cache.keys(), vec!["b#1".to_string()]);
    }
}
