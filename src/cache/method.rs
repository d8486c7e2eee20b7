//! Cache of method definitions and their dispatch urns

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CacheError, CacheOptions, JsonCodec, TtlCache, ValueCodec};
use crate::convert::EntityAccess;
use crate::dom::Element;
use crate::refresher::RefreshTarget;
use crate::schema::Schema;

/// Direction of a method parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParameterDirection {
    In,
    Out,
}

/// One declared parameter of a method
#[derive(Debug, Clone, PartialEq)]
pub struct MethodParameter {
    pub name: String,
    pub data_type: String,
    pub direction: ParameterDirection,
}

/// A method definition and the urn it is invoked on
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDefinition {
    /// Dispatch address: the schema id, interface id, or `interface|schema`
    pub urn: String,
    /// The `<method>` definition markup
    pub element: Element,
}

impl MethodDefinition {
    pub fn name(&self) -> &str {
        self.element.attribute("name").unwrap_or_default()
    }

    pub fn is_static(&self) -> bool {
        (&self.element).get_attribute_as_boolean("static")
    }

    /// Declared parameters in order; `inout="out"` marks outputs
    pub fn parameters(&self) -> Vec<MethodParameter> {
        let Some(parameters) = self.element.first_child("parameters") else {
            return Vec::new();
        };
        parameters
            .children_named("param")
            .map(|param| MethodParameter {
                name: param.get_attribute_as_string("name"),
                data_type: param.attribute("type").unwrap_or("string").to_string(),
                direction: if param.attribute("inout") == Some("out") {
                    ParameterDirection::Out
                } else {
                    ParameterDirection::In
                },
            })
            .collect()
    }

    pub fn input_parameters(&self) -> Vec<MethodParameter> {
        self.parameters()
            .into_iter()
            .filter(|p| p.direction == ParameterDirection::In)
            .collect()
    }

    pub fn output_parameters(&self) -> Vec<MethodParameter> {
        self.parameters()
            .into_iter()
            .filter(|p| p.direction == ParameterDirection::Out)
            .collect()
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedMethod {
    urn: String,
    method: String,
}

/// Persists a method as `{urn, method}` with the definition as markup text
struct MethodCodec;

impl ValueCodec<MethodDefinition> for MethodCodec {
    fn encode(&self, value: &MethodDefinition) -> Result<String, CacheError> {
        let persisted = PersistedMethod {
            urn: value.urn.clone(),
            method: value
                .element
                .to_xml_string()
                .map_err(|e| CacheError::Encode(e.to_string()))?,
        };
        serde_json::to_string(&persisted).map_err(|e| CacheError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &str) -> Result<MethodDefinition, CacheError> {
        let persisted: PersistedMethod =
            serde_json::from_str(raw).map_err(|e| CacheError::Decode(e.to_string()))?;
        let element = Element::parse(&persisted.method).map_err(|e| CacheError::Decode(e.to_string()))?;
        Ok(MethodDefinition {
            urn: persisted.urn,
            element,
        })
    }
}

/// Method definitions keyed by `{schemaId}#{methodName}`
///
/// A second cache records the method names held for each schema or
/// interface id, so persisted methods can be found and removed without
/// first being loaded into memory.
pub struct MethodCache {
    cache: TtlCache<MethodDefinition>,
    names: TtlCache<Vec<String>>,
}

impl MethodCache {
    pub fn new(options: &CacheOptions) -> Self {
        Self {
            cache: TtlCache::new("MethodCache", Arc::new(MethodCodec), options)
                .with_key_builder(Arc::new(|parts: &[&str]| parts.join("#"))),
            names: TtlCache::new("MethodNames", Arc::new(JsonCodec), options),
        }
    }

    /// Cache every method a schema declares
    ///
    /// Interface methods go under the interface id (`namespace:X`). Methods
    /// of implemented interfaces that are already cached, in memory or in
    /// storage, are copied under the composite urn `interface|schema`. The
    /// schema's own methods are written last and win over inherited ones of
    /// the same name.
    pub async fn put(&self, schema: &Schema) {
        let schema_id = schema.id();

        for interface in schema.source.children_named("interface") {
            let Some(name) = interface.attribute("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            let urn = format!("{}:{}", schema.namespace, name);
            for method in methods_of(interface) {
                self.put_method(&urn, &urn, method).await;
            }
        }

        for implemented in &schema.implements {
            let inherited = self.methods_of_owner(implemented).await;
            if inherited.is_empty() {
                debug!("{} implements {} but no methods of it are cached", schema_id, implemented);
            }
            let urn = format!("{}|{}", implemented, schema_id);
            for method in inherited {
                self.put_method(schema_id, &urn, &method.element).await;
            }
        }

        for methods in schema.source.children_named("methods") {
            for method in methods.children_named("method") {
                self.put_method(schema_id, schema_id, method).await;
            }
        }
    }

    async fn put_method(&self, owner: &str, urn: &str, method: &Element) {
        let Some(name) = method.attribute("name").filter(|n| !n.is_empty()) else {
            return;
        };
        let definition = MethodDefinition {
            urn: urn.to_string(),
            element: method.clone(),
        };
        self.cache.put(&[owner, name], definition).await;

        let mut names = self.names.get(&[owner]).await.unwrap_or_default();
        if !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        self.names.put(&[owner], names).await;
    }

    /// Live methods cached under a schema or interface id
    async fn methods_of_owner(&self, owner: &str) -> Vec<MethodDefinition> {
        let mut methods = Vec::new();
        for name in self.names.get(&[owner]).await.unwrap_or_default() {
            if let Some(method) = self.cache.get(&[owner, name.as_str()]).await {
                methods.push(method);
            }
        }
        methods
    }

    /// Method definition and urn for `schema_id#method_name`
    pub async fn get(&self, schema_id: &str, method_name: &str) -> Option<MethodDefinition> {
        self.cache.get(&[schema_id, method_name]).await
    }

    /// Drop every method cached for a schema (or interface) id, returning the keys removed
    pub async fn remove_schema(&self, schema_id: &str) -> Vec<String> {
        let mut removed: Vec<String> = self
            .names
            .get(&[schema_id])
            .await
            .unwrap_or_default()
            .iter()
            .map(|name| self.cache.build_key(&[schema_id, name.as_str()]))
            .collect();
        for key in &removed {
            self.cache.remove(key).await;
        }
        self.names.remove(schema_id).await;

        let prefix = format!("{}#", schema_id);
        for key in self.cache.remove_matching(move |key| key.starts_with(&prefix)).await {
            if !removed.contains(&key) {
                removed.push(key);
            }
        }
        removed.sort();
        removed
    }

    pub async fn clear(&self) {
        self.cache.clear().await;
        self.names.clear().await;
    }

    pub fn inner(&self) -> &TtlCache<MethodDefinition> {
        &self.cache
    }
}

/// `<method>` children of an interface or methods group, including nested `<methods>`
fn methods_of(group: &Element) -> Vec<&Element> {
    let mut methods: Vec<&Element> = group.children_named("method").collect();
    for nested in group.children_named("methods") {
        methods.extend(nested.children_named("method"));
    }
    methods
}

#[async_trait]
impl RefreshTarget for MethodCache {
    fn cache_name(&self) -> &str {
        self.cache.name()
    }

    async fn clear(&self) {
        MethodCache::clear(self).await;
    }

    async fn remove_entity(&self, _schema: &str, pk: &str) {
        self.remove_schema(pk).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameters() {
        let element = Element::parse(
            r#"<method name="GetOption" static="true">
                 <parameters>
                   <param name="name" type="string"/>
                   <param name="value" type="string" inout="out"/>
                   <param name="type" type="byte" inout="out"/>
                 </parameters>
               </method>"#,
        )
        .unwrap();
        let method = MethodDefinition {
            urn: "xtk:session".to_string(),
            element,
        };
        assert_eq!(method.name(), "GetOption");
        assert!(method.is_static());
        assert_eq!(method.parameters().len(), 3);
        assert_eq!(method.input_parameters()[0].name, "name");
        assert_eq!(method.output_parameters()[1].data_type, "byte");
    }

    #[tokio::test]
    async fn test_interface_and_own_methods() {
        let schema = Schema::parse_str(
            r#"<schema namespace="xtk" name="session">
                 <interface name="persist">
                   <method name="Write" static="true"/>
                 </interface>
                 <methods>
                   <method name="Logon" static="true"/>
                 </methods>
                 <element name="session"/>
               </schema>"#,
        )
        .unwrap();
        let cache = MethodCache::new(&CacheOptions::default());
        cache.put(&schema).await;

        let write = cache.get("xtk:persist", "Write").await.unwrap();
        assert_eq!(write.urn, "xtk:persist");
        let logon = cache.get("xtk:session", "Logon").await.unwrap();
        assert_eq!(logon.urn, "xtk:session");
        assert!(cache.get("xtk:session", "Write").await.is_none());
    }

    #[tokio::test]
    async fn test_remove_schema_only_touches_its_methods() {
        let cache = MethodCache::new(&CacheOptions::default());
        cache
            .put(
                &Schema::parse_str(
                    r#"<schema namespace="nms" name="delivery"><methods><method name="Prepare"/></methods></schema>"#,
                )
                .unwrap(),
            )
            .await;
        cache
            .put(
                &Schema::parse_str(
                    r#"<schema namespace="nms" name="deliveryPart"><methods><method name="Split"/></methods></schema>"#,
                )
                .unwrap(),
            )
            .await;
        let removed = cache.remove_schema("nms:delivery").await;
        assert_eq!(removed, vec!["nms:delivery#Prepare".to_string()]);
        assert!(cache.get("nms:deliveryPart", "Split").await.is_some());
    }

    fn delivery() -> Schema {
        Schema::parse_str(
            r#"<schema namespace="nms" name="delivery" implements="xtk:persist">
                 <methods><method name="Prepare"/></methods>
               </schema>"#,
        )
        .unwrap()
    }

    fn session() -> Schema {
        Schema::parse_str(
            r#"<schema namespace="xtk" name="session">
                 <interface name="persist"><method name="Write" static="true"/></interface>
               </schema>"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_inherits_interface_methods_held_only_in_storage() {
        let storage = Arc::new(crate::storage::MemoryStorageBackend::new());
        let options = CacheOptions::default().with_storage(storage);
        MethodCache::new(&options).put(&session()).await;

        let cache = MethodCache::new(&options);
        cache.put(&delivery()).await;
        let write = cache.get("nms:delivery", "Write").await.unwrap();
        assert_eq!(write.urn, "xtk:persist|nms:delivery");
        assert!(write.is_static());
    }

    #[tokio::test]
    async fn test_remove_schema_reaches_persisted_methods() {
        let storage = Arc::new(crate::storage::MemoryStorageBackend::new());
        let options = CacheOptions::default().with_storage(storage);
        let first = MethodCache::new(&options);
        first.put(&session()).await;
        first.put(&delivery()).await;

        let second = MethodCache::new(&options);
        let removed = second.remove_schema("nms:delivery").await;
        assert_eq!(
            removed,
            vec!["nms:delivery#Prepare".to_string(), "nms:delivery#Write".to_string()]
        );
        assert!(second.get("nms:delivery", "Prepare").await.is_none());
        assert!(MethodCache::new(&options).get("nms:delivery", "Write").await.is_none());
        assert!(second.get("xtk:persist", "Write").await.is_some());
    }
}
