//! Session-scoped cache ownership
//!
//! Each client session owns one [`ClientCaches`]: the four caches, the
//! refreshers keeping them in sync with the server, and the factory for the
//! session's [`SchemaRegistry`]. Nothing here is global; two sessions never
//! share cache state unless they share a storage backend.

use std::sync::{Arc, Mutex, PoisonError};

use tracing::info;

use crate::cache::{CacheOptions, Clock, MetadataCache, MethodCache, OptionCache, SCHEMA_ENTITY_TYPE, SchemaCache};
use crate::config::{ClientConfig, ConfigError};
use crate::refresher::{CacheRefresher, RefreshError, RefreshOutcome};
use crate::registry::SchemaRegistry;
use crate::storage::StorageBackend;
use crate::transport::{MethodInvoker, SchemaFetcher};

/// Entity type of server options, used to filter option invalidations
pub const OPTION_ENTITY_TYPE: &str = "xtk:option";

/// The caches and refreshers of one client session
pub struct ClientCaches {
    config: ClientConfig,
    options: CacheOptions,
    schemas: Arc<SchemaCache>,
    methods: Arc<MethodCache>,
    option_values: Arc<OptionCache>,
    metadata: Arc<MetadataCache>,
    refreshers: Mutex<Vec<Arc<CacheRefresher>>>,
}

impl ClientCaches {
    /// Build every cache for a session
    ///
    /// `storage` backs the caches only when `config.persistent_cache` is set.
    pub fn new(
        config: ClientConfig,
        storage: Option<Arc<dyn StorageBackend>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let options = config.cache_options(storage, clock);
        Ok(Self {
            schemas: Arc::new(SchemaCache::new(&options)),
            methods: Arc::new(MethodCache::new(&options)),
            option_values: Arc::new(OptionCache::new(&options)),
            metadata: Arc::new(MetadataCache::new(&options)),
            refreshers: Mutex::new(Vec::new()),
            config,
            options,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn cache_options(&self) -> &CacheOptions {
        &self.options
    }

    pub fn schemas(&self) -> &Arc<SchemaCache> {
        &self.schemas
    }

    pub fn methods(&self) -> &Arc<MethodCache> {
        &self.methods
    }

    pub fn options(&self) -> &Arc<OptionCache> {
        &self.option_values
    }

    pub fn metadata(&self) -> &Arc<MetadataCache> {
        &self.metadata
    }

    /// A registry serving schemas and methods from this session's caches
    pub fn registry(&self, fetcher: Arc<dyn SchemaFetcher>) -> SchemaRegistry {
        SchemaRegistry::new(fetcher, self.schemas.clone(), self.methods.clone())
    }

    /// Create the refreshers enabled by the configuration
    ///
    /// Any refreshers from a previous call are stopped and replaced. The new
    /// ones are polling but not scheduled: drive them with
    /// [`ClientCaches::tick_refreshers`] or [`ClientCaches::spawn_refreshers`].
    pub fn start_refresh(&self, invoker: Arc<dyn MethodInvoker>) -> Vec<Arc<CacheRefresher>> {
        self.stop_refresh();
        let period = self.config.refresh_period();
        let mut refreshers = Vec::new();
        if self.config.refresh_schemas {
            refreshers.push(Arc::new(
                CacheRefresher::new(
                    self.schemas.clone(),
                    invoker.clone(),
                    self.metadata.clone(),
                    SCHEMA_ENTITY_TYPE,
                )
                .with_period(period),
            ));
            refreshers.push(Arc::new(
                CacheRefresher::new(
                    self.methods.clone(),
                    invoker.clone(),
                    self.metadata.clone(),
                    SCHEMA_ENTITY_TYPE,
                )
                .with_period(period),
            ));
        }
        if self.config.refresh_options {
            refreshers.push(Arc::new(
                CacheRefresher::new(
                    self.option_values.clone(),
                    invoker,
                    self.metadata.clone(),
                    OPTION_ENTITY_TYPE,
                )
                .with_period(period),
            ));
        }
        *self.refreshers.lock().unwrap_or_else(PoisonError::into_inner) = refreshers.clone();
        refreshers
    }

    pub fn refreshers(&self) -> Vec<Arc<CacheRefresher>> {
        self.refreshers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run one poll on every refresher, in order
    pub async fn tick_refreshers(&self) -> Vec<Result<RefreshOutcome, RefreshError>> {
        let mut outcomes = Vec::new();
        for refresher in self.refreshers() {
            outcomes.push(refresher.tick().await);
        }
        outcomes
    }

    /// Schedule every refresher on the tokio runtime
    #[cfg(feature = "background-refresh")]
    pub fn spawn_refreshers(&self) {
        for refresher in self.refreshers() {
            refresher.spawn();
        }
    }

    /// Stop every refresher
    pub fn stop_refresh(&self) {
        for refresher in self.refreshers() {
            refresher.stop_refresh();
        }
    }

    /// Clear every cache of the session
    pub async fn clear_all(&self) {
        self.schemas.clear().await;
        self.methods.clear().await;
        self.option_values.clear().await;
        self.metadata.clear().await;
        info!("Cleared all session caches");
    }
}

impl std::fmt::Debug for ClientCaches {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCaches")
            .field("config", &self.config)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
