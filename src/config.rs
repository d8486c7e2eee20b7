//! Client configuration

use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::cache::{CacheOptions, Clock, DEFAULT_STORAGE_ROOT, DEFAULT_TTL_SECS};
use crate::refresher::DEFAULT_REFRESH_PERIOD_SECS;
use crate::storage::StorageBackend;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// Settings for one client session's caches and refreshers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Lifetime of cached schemas, methods and options; 0 disables expiry
    pub cache_ttl_secs: i64,
    /// Time between two reconciliation polls
    pub refresh_period_secs: i64,
    /// Prefix of every persisted cache key
    pub storage_key_root: String,
    /// Back the caches with the session's storage, when one is given
    pub persistent_cache: bool,
    /// Run a refresher over the schema and method caches
    pub refresh_schemas: bool,
    /// Run a refresher over the option cache
    pub refresh_options: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: DEFAULT_TTL_SECS,
            refresh_period_secs: DEFAULT_REFRESH_PERIOD_SECS,
            storage_key_root: DEFAULT_STORAGE_ROOT.to_string(),
            persistent_cache: true,
            refresh_schemas: true,
            refresh_options: true,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache_ttl_secs < 0 {
            return Err(ConfigError::Invalid(format!(
                "cache_ttl_secs must not be negative, got {}",
                self.cache_ttl_secs
            )));
        }
        if self.refresh_period_secs <= 0 {
            return Err(ConfigError::Invalid(format!(
                "refresh_period_secs must be positive, got {}",
                self.refresh_period_secs
            )));
        }
        if self.storage_key_root.trim().is_empty() {
            return Err(ConfigError::Invalid("storage_key_root must not be empty".to_string()));
        }
        if self.storage_key_root.contains('$') {
            return Err(ConfigError::Invalid(format!(
                "storage_key_root must not contain '$': {}",
                self.storage_key_root
            )));
        }
        Ok(())
    }

    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::seconds(self.cache_ttl_secs))
    }

    pub fn refresh_period(&self) -> Duration {
        Duration::seconds(self.refresh_period_secs)
    }

    /// Cache options for this configuration
    ///
    /// `storage` is ignored when `persistent_cache` is off.
    pub fn cache_options(&self, storage: Option<Arc<dyn StorageBackend>>, clock: Arc<dyn Clock>) -> CacheOptions {
        let mut options = CacheOptions::new()
            .with_ttl(self.cache_ttl())
            .with_storage_root(self.storage_key_root.clone())
            .with_clock(clock);
        if self.persistent_cache
            && let Some(storage) = storage
        {
            options = options.with_storage(storage);
        }
        options
    }

    /// Parse and validate a TOML document
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    #[cfg(feature = "config-file")]
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file: {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Invalid configuration file: {:?}", path))
    }
}
