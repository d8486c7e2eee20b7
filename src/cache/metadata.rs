//! Cache of small bookkeeping values

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use super::{CacheOptions, JsonCodec, TtlCache};

/// JSON values that never expire; they only go away on `clear()` or `remove()`
pub struct MetadataCache {
    cache: TtlCache<Value>,
}

impl MetadataCache {
    pub fn new(options: &CacheOptions) -> Self {
        let options = options.clone().with_ttl(None);
        Self {
            cache: TtlCache::new("MetadataCache", Arc::new(JsonCodec), &options),
        }
    }

    pub async fn get(&self, key: &str) -> Option<Value> {
        self.cache.get(&[key]).await
    }

    pub async fn put(&self, key: &str, value: Value) {
        self.cache.put(&[key], value).await;
    }

    /// Typed read; a value of the wrong shape reads as absent
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                warn!("Metadata entry {} has an unexpected shape: {}", key, e);
                None
            }
        }
    }

    pub async fn put_as<T: Serialize>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.put(key, json).await,
            Err(e) => warn!("Metadata entry {} could not be serialized: {}", key, e),
        }
    }

    pub async fn remove(&self, key: &str) {
        self.cache.remove(key).await;
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    pub fn inner(&self) -> &TtlCache<Value> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use chrono::{Duration, Utc};
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Mark {
        time: String,
    }

    #[tokio::test]
    async fn test_entries_do_not_expire() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = MetadataCache::new(&CacheOptions::default().with_clock(clock.clone()));
        assert!(cache.inner().ttl().is_none());

        cache.put_as("refresh", &Mark { time: "t1".to_string() }).await;
        clock.advance(Duration::days(30));
        assert_eq!(
            cache.get_as::<Mark>("refresh").await,
            Some(Mark { time: "t1".to_string() })
        );
    }

    #[tokio::test]
    async fn test_wrong_shape_reads_as_absent() {
        let cache = MetadataCache::new(&CacheOptions::default());
        cache.put("refresh", Value::from(12)).await;
        assert!(cache.get_as::<Mark>("refresh").await.is_none());
        assert_eq!(cache.get("refresh").await, Some(Value::from(12)));
    }
}
