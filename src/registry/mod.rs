//! Schema and method dispatch
//!
//! [`SchemaRegistry`] answers "what is schema X" and "how do I call method M
//! on schema X". Both are served from the caches when possible; on a miss the
//! schema definition is fetched once, parsed, and used to populate both the
//! schema cache and the method cache.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::cache::{MethodCache, MethodDefinition, SCHEMA_ENTITY_TYPE, SchemaCache};
use crate::schema::{Schema, SchemaError, SchemaResolver, SchemaResult, is_temp_schema};
use crate::transport::SchemaFetcher;

/// Lazily populated view of the server's schemas and methods
pub struct SchemaRegistry {
    fetcher: Arc<dyn SchemaFetcher>,
    schemas: Arc<SchemaCache>,
    methods: Arc<MethodCache>,
}

impl SchemaRegistry {
    pub fn new(fetcher: Arc<dyn SchemaFetcher>, schemas: Arc<SchemaCache>, methods: Arc<MethodCache>) -> Self {
        Self {
            fetcher,
            schemas,
            methods,
        }
    }

    pub fn schemas(&self) -> &Arc<SchemaCache> {
        &self.schemas
    }

    pub fn methods(&self) -> &Arc<MethodCache> {
        &self.methods
    }

    /// Get a schema, fetching and caching it on first use
    ///
    /// `Ok(None)` when the server has no such schema. Fetch failures and
    /// unparseable definitions are errors.
    pub async fn get_schema(&self, schema_id: &str) -> SchemaResult<Option<Arc<Schema>>> {
        if let Some(schema) = self.schemas.get_schema(schema_id).await {
            debug!("Schema {} served from cache", schema_id);
            return Ok(Some(schema));
        }

        let definition = self
            .fetcher
            .fetch(schema_id)
            .await
            .map_err(|fault| SchemaError::Fetch {
                schema_id: schema_id.to_string(),
                message: fault.to_string(),
            })?;
        let Some(definition) = definition else {
            debug!("Schema {} does not exist on the server", schema_id);
            return Ok(None);
        };

        let schema = Arc::new(Schema::parse(&definition)?);
        if is_temp_schema(schema_id) {
            debug!("Not caching ephemeral schema {}", schema_id);
            return Ok(Some(schema));
        }

        self.methods.put(&schema).await;
        self.schemas.put_schema(schema.clone()).await;
        if schema.id() != schema_id {
            warn!("Requested schema {} but the server returned {}", schema_id, schema.id());
            self.schemas.put(SCHEMA_ENTITY_TYPE, schema_id, schema.clone()).await;
        }
        info!("Loaded schema {}", schema.id());
        Ok(Some(schema))
    }

    /// Method definition and dispatch urn for `schema_id#method_name`
    ///
    /// `schema_id` may also be an interface id (`xtk:persist`) once the schema
    /// declaring that interface has been loaded.
    pub async fn get_method(&self, schema_id: &str, method_name: &str) -> SchemaResult<Option<MethodDefinition>> {
        if let Some(method) = self.methods.get(schema_id, method_name).await {
            return Ok(Some(method));
        }
        let Some(schema) = self.get_schema(schema_id).await? else {
            return Ok(None);
        };
        if let Some(method) = self.methods.get(schema_id, method_name).await {
            return Ok(Some(method));
        }
        // The schema came from cache but its methods had been evicted
        self.methods.put(&schema).await;
        Ok(self.methods.get(schema_id, method_name).await)
    }

    /// Forget a schema and its methods
    pub async fn invalidate(&self, schema_id: &str) {
        self.schemas.remove(SCHEMA_ENTITY_TYPE, schema_id).await;
        self.methods.remove_schema(schema_id).await;
    }
}

#[async_trait]
impl SchemaResolver for SchemaRegistry {
    async fn get_schema(&self, schema_id: &str) -> SchemaResult<Option<Arc<Schema>>> {
        SchemaRegistry::get_schema(self, schema_id).await
    }
}

impl std::fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaRegistry").finish_non_exhaustive()
    }
}
