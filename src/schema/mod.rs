//! Schema node model
//!
//! Parses schema definitions into an arena of nodes and exposes navigation
//! over them: path lookup, `ref` aliases, links into other schemas, joins,
//! keys and enumerations.
//!
//! Lookups that cross into another schema go through a [`SchemaResolver`],
//! normally the session's [`crate::registry::SchemaRegistry`].
//!
//! Error convention: malformed metadata (a ref or link target with the wrong
//! shape, a key field without a path, ...) is an `Err`. Anything that is
//! legitimately absent is `Ok(None)` or an empty list.

pub mod definition;
pub mod enumeration;
pub mod node;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::dom::XmlError;

pub use definition::{DefaultValue, Join, Key, Schema};
pub use enumeration::{EnumValue, Enumeration, EnumerationValue};
pub use node::{FindOptions, NodeId, SchemaNode};

/// Boxed future used by the recursive navigation methods
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Separator used when building localization ids
pub const LOCALIZATION_SEPARATOR: &str = "__";

/// Prefix of ephemeral, per-query schemas that must never be cached
pub const TEMP_GROUP_PREFIX: &str = "temp:group:";

/// `namespace:name`
static SCHEMA_ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_\-]+):([A-Za-z0-9_\-]+)$").unwrap());

/// `namespace:name:path` (ref values, qualified enumeration names, link targets with a sub-path)
static QUALIFIED_PATH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z0-9_\-]+:[A-Za-z0-9_\-]+):([^:]+)$").unwrap());

/// Error type for schema parsing and navigation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaError {
    /// The definition or a lookup argument violates its documented shape
    #[error("Malformed schema metadata: {0}")]
    MalformedMetadata(String),

    /// The definition document could not be parsed
    #[error("Invalid schema document: {0}")]
    Xml(#[from] XmlError),

    /// The schema could not be fetched from the server
    #[error("Failed to fetch schema {schema_id}: {message}")]
    Fetch { schema_id: String, message: String },
}

impl SchemaError {
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedMetadata(message.into())
    }

    pub fn is_malformed_metadata(&self) -> bool {
        matches!(self, Self::MalformedMetadata(_) | Self::Xml(_))
    }
}

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Source of schemas for cross-schema navigation
#[async_trait]
pub trait SchemaResolver: Send + Sync {
    /// Get a schema by id (`namespace:name`); `Ok(None)` if it does not exist
    async fn get_schema(&self, schema_id: &str) -> SchemaResult<Option<Arc<Schema>>>;
}

/// Resolver over a fixed set of already-parsed schemas
#[derive(Debug, Default, Clone)]
pub struct StaticResolver {
    schemas: HashMap<String, Arc<Schema>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.insert(schema);
        self
    }

    pub fn insert(&mut self, schema: Schema) -> Arc<Schema> {
        let schema = Arc::new(schema);
        self.schemas.insert(schema.id().to_string(), schema.clone());
        schema
    }

    /// Parse a definition document and add it
    pub fn insert_xml(&mut self, xml: &str) -> SchemaResult<Arc<Schema>> {
        Ok(self.insert(Schema::parse_str(xml)?))
    }

    pub fn get(&self, schema_id: &str) -> Option<Arc<Schema>> {
        self.schemas.get(schema_id).cloned()
    }
}

#[async_trait]
impl SchemaResolver for StaticResolver {
    async fn get_schema(&self, schema_id: &str) -> SchemaResult<Option<Arc<Schema>>> {
        Ok(self.get(schema_id))
    }
}

/// Split `namespace:name` into its parts
pub fn parse_schema_id(schema_id: &str) -> Option<(&str, &str)> {
    let captures = SCHEMA_ID_RE.captures(schema_id)?;
    let namespace = captures.get(1)?.as_str();
    let name = captures.get(2)?.as_str();
    Some((namespace, name))
}

/// Split `namespace:name:path` into schema id and path
pub fn parse_qualified_path(value: &str) -> Option<(&str, &str)> {
    let captures = QUALIFIED_PATH_RE.captures(value)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

/// Whether a schema id names an ephemeral query schema
pub fn is_temp_schema(schema_id: &str) -> bool {
    schema_id.starts_with(TEMP_GROUP_PREFIX)
}
