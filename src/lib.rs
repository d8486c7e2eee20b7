//! Campaign SDK core - schema-driven entity handling for the Campaign SOAP client
//!
//! Provides:
//! - Entity representations (markup tree, BadgerFish JSON, SimpleJson) and conversion
//! - Schema parsing and navigation (paths, refs, links, joins, keys, enumerations)
//! - TTL caches for schemas, methods, options and metadata with optional persistence
//! - Method dispatch (method definition + urn) with interface inheritance
//! - Poll-driven cache invalidation against server-side changes

pub mod cache;
pub mod client;
pub mod config;
pub mod convert;
pub mod dom;
pub mod refresher;
pub mod registry;
pub mod schema;
pub mod storage;
pub mod transport;

// Re-export commonly used types
pub use storage::{MemoryStorageBackend, SafeStorage, StorageBackend, StorageError};
#[cfg(feature = "native-fs")]
pub use storage::filesystem::FileSystemStorageBackend;

pub use dom::{Element, XmlError, XmlNode};
pub use convert::{ConversionError, Entity, EntityAccess, EntityRef, Flavor, Representation, from_json, to_json};

pub use cache::{
    CacheEntry, CacheError, CacheOptions, Clock, ManualClock, MetadataCache, MethodCache, MethodDefinition,
    MethodParameter, OptionCache, OptionType, OptionValue, ParameterDirection, SchemaCache, SystemClock, TtlCache,
};

pub use schema::{
    DefaultValue, EnumValue, Enumeration, EnumerationValue, FindOptions, Join, Key, Schema, SchemaError, SchemaNode,
    SchemaResolver, SchemaResult, StaticResolver,
};

pub use registry::SchemaRegistry;
pub use refresher::{CacheRefresher, RefreshError, RefreshOutcome, RefreshState, RefreshTarget};
pub use transport::{MethodInvoker, SchemaFetcher, SoapFault};

pub use client::ClientCaches;
pub use config::{ClientConfig, ConfigError};
