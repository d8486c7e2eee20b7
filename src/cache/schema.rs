//! Cache of parsed schemas

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::{CacheError, CacheOptions, TtlCache, ValueCodec};
use crate::refresher::RefreshTarget;
use crate::schema::{Schema, is_temp_schema};

/// Entity type under which schema definitions are cached
pub const SCHEMA_ENTITY_TYPE: &str = "xtk:schema";

/// Persists a schema as its definition markup and re-parses it on load
struct SchemaCodec;

impl ValueCodec<Arc<Schema>> for SchemaCodec {
    fn encode(&self, value: &Arc<Schema>) -> Result<String, CacheError> {
        value
            .source
            .to_xml_string()
            .map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<Arc<Schema>, CacheError> {
        Schema::parse_str(raw)
            .map(Arc::new)
            .map_err(|e| CacheError::Decode(e.to_string()))
    }
}

/// Parsed schemas keyed by (entity type, schema id), e.g. `xtk:schema|nms:recipient`
pub struct SchemaCache {
    cache: TtlCache<Arc<Schema>>,
}

impl SchemaCache {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            cache: TtlCache::new("XtkEntityCache", Arc::new(SchemaCodec), options),
        }
    }

    pub async fn get(&self, entity_type: &str, schema_id: &str) -> Option<Arc<Schema>> {
        if is_temp_schema(schema_id) {
            return None;
        }
        self.cache.get(&[entity_type, schema_id]).await
    }

    /// Cache a schema; ephemeral `temp:group:*` schemas are never cached
    pub async fn put(&self, entity_type: &str, schema_id: &str, schema: Arc<Schema>) {
        if is_temp_schema(schema_id) {
            debug!("Not caching ephemeral schema {}", schema_id);
            return;
        }
        self.cache.put(&[entity_type, schema_id], schema).await;
    }

    /// Cache a schema under the schema entity type and its own id
    pub async fn put_schema(&self, schema: Arc<Schema>) {
        let id = schema.id().to_string();
        self.put(SCHEMA_ENTITY_TYPE, &id, schema).await;
    }

    pub async fn get_schema(&self, schema_id: &str) -> Option<Arc<Schema>> {
        self.get(SCHEMA_ENTITY_TYPE, schema_id).await
    }

    pub async fn remove(&self, entity_type: &str, schema_id: &str) {
        let key = self.cache.build_key(&[entity_type, schema_id]);
        self.cache.remove(&key).await;
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
    }

    /// The underlying TTL cache
    pub fn inner(&self) -> &TtlCache<Arc<Schema>> {
        &self.cache
    }
}

#[async_trait]
impl RefreshTarget for SchemaCache {
    fn cache_name(&self) -> &str {
        self.cache.name()
    }

    async fn clear(&self) {
        SchemaCache::clear(self).await;
    }

    async fn remove_entity(&self, schema: &str, pk: &str) {
        self.remove(schema, pk).await;
    }
}
