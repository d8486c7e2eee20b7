//! Schema and method dispatch tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use campaign_sdk_core::cache::{CacheOptions, ManualClock};
use campaign_sdk_core::dom::Element;
use campaign_sdk_core::schema::FindOptions;
use campaign_sdk_core::storage::{MemoryStorageBackend, StorageBackend};
use campaign_sdk_core::transport::{SchemaFetcher, SoapFault};
use campaign_sdk_core::{ClientCaches, ClientConfig, MethodCache, RefreshTarget, SchemaCache, SchemaRegistry};

const SESSION: &str = r#"
<schema namespace="xtk" name="session">
  <interface name="persist">
    <method name="Write" static="true">
      <parameters><param name="doc" type="DOMDocument"/></parameters>
    </method>
    <method name="Delete"/>
  </interface>
  <methods>
    <method name="Logon" static="true">
      <parameters>
        <param name="login" type="string"/>
        <param name="password" type="string"/>
        <param name="sessionToken" type="string" inout="out"/>
      </parameters>
    </method>
  </methods>
</schema>"#;

const DELIVERY: &str = r#"
<schema namespace="nms" name="delivery" implements="xtk:persist">
  <element name="delivery">
    <attribute name="label"/>
    <element name="recipient" type="link" target="nms:recipient"/>
  </element>
  <methods>
    <method name="Delete"/>
    <method name="Prepare"/>
  </methods>
</schema>"#;

const RECIPIENT: &str = r#"
<schema namespace="nms" name="recipient">
  <element name="recipient"><attribute name="email"/></element>
</schema>"#;

/// Serves canned definitions and records every fetch
#[derive(Default)]
struct MockSchemaFetcher {
    definitions: HashMap<String, String>,
    fetches: Mutex<Vec<String>>,
    failing: bool,
}

impl MockSchemaFetcher {
    fn with(definitions: &[(&str, &str)]) -> Self {
        Self {
            definitions: definitions
                .iter()
                .map(|(id, xml)| (id.to_string(), xml.to_string()))
                .collect(),
            ..Self::default()
        }
    }

    fn fetch_count(&self) -> usize {
        self.fetches.lock().unwrap().len()
    }
}

#[async_trait]
impl SchemaFetcher for MockSchemaFetcher {
    async fn fetch(&self, schema_id: &str) -> Result<Option<Element>, SoapFault> {
        self.fetches.lock().unwrap().push(schema_id.to_string());
        if self.failing {
            return Err(SoapFault::Transport("connection refused".to_string()));
        }
        match self.definitions.get(schema_id) {
            Some(xml) => Ok(Some(Element::parse(xml).unwrap())),
            None => Ok(None),
        }
    }
}

fn registry(fetcher: Arc<MockSchemaFetcher>) -> SchemaRegistry {
    let options = CacheOptions::default();
    SchemaRegistry::new(
        fetcher,
        Arc::new(SchemaCache::new(&options)),
        Arc::new(MethodCache::new(&options)),
    )
}

fn fetcher() -> Arc<MockSchemaFetcher> {
    Arc::new(MockSchemaFetcher::with(&[
        ("xtk:session", SESSION),
        ("nms:delivery", DELIVERY),
        ("nms:recipient", RECIPIENT),
    ]))
}

mod method_tests {
    use super::*;

    #[tokio::test]
    async fn test_own_method_and_parameters() {
        let registry = registry(fetcher());
        let logon = registry.get_method("xtk:session", "Logon").await.unwrap().unwrap();
        assert_eq!(logon.urn, "xtk:session");
        assert!(logon.is_static());
        assert_eq!(logon.input_parameters().len(), 2);
        let outputs = logon.output_parameters();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].name, "sessionToken");
    }

    #[tokio::test]
    async fn test_interface_methods_are_inherited() {
        let registry = registry(fetcher());
        registry.get_schema("xtk:session").await.unwrap().unwrap();

        let write = registry.get_method("xtk:persist", "Write").await.unwrap().unwrap();
        assert_eq!(write.urn, "xtk:persist");

        let inherited = registry.get_method("nms:delivery", "Write").await.unwrap().unwrap();
        assert_eq!(inherited.urn, "xtk:persist|nms:delivery");
        assert!(inherited.is_static());

        // Own definitions win over inherited ones
        let delete = registry.get_method("nms:delivery", "Delete").await.unwrap().unwrap();
        assert_eq!(delete.urn, "nms:delivery");
    }

    #[tokio::test]
    async fn test_unknown_method_is_none() {
        let registry = registry(fetcher());
        assert!(registry.get_method("nms:delivery", "Explode").await.unwrap().is_none());
        assert!(registry.get_method("nms:nothing", "Write").await.unwrap().is_none());
    }
}

mod schema_tests {
    use super::*;

    #[tokio::test]
    async fn test_schemas_are_fetched_once() {
        let fetcher = fetcher();
        let registry = registry(fetcher.clone());
        registry.get_schema("nms:delivery").await.unwrap().unwrap();
        registry.get_method("nms:delivery", "Prepare").await.unwrap().unwrap();
        registry.get_schema("nms:delivery").await.unwrap().unwrap();
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let fetcher = fetcher();
        let registry = registry(fetcher.clone());
        registry.get_schema("nms:delivery").await.unwrap();
        registry.invalidate("nms:delivery").await;
        assert!(registry.methods().get("nms:delivery", "Prepare").await.is_none());
        registry.get_schema("nms:delivery").await.unwrap();
        assert_eq!(fetcher.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_an_error() {
        let fetcher = Arc::new(MockSchemaFetcher {
            failing: true,
            ..MockSchemaFetcher::default()
        });
        let registry = registry(fetcher);
        let err = registry.get_schema("nms:recipient").await.unwrap_err();
        assert!(err.to_string().contains("connection refused"));
        assert!(!err.is_malformed_metadata());
    }

    #[tokio::test]
    async fn test_registry_resolves_links_on_demand() {
        let fetcher = fetcher();
        let registry = registry(fetcher.clone());
        let delivery = registry.get_schema("nms:delivery").await.unwrap().unwrap();
        let email = delivery
            .root()
            .unwrap()
            .find_node(&registry, "recipient/@email", FindOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(email.full_name(), "nms:recipient:recipient/@email");
        assert_eq!(fetcher.fetch_count(), 2);
    }
}

mod session_tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_sessions_sharing_storage_share_schemas() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorageBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let first = ClientCaches::new(ClientConfig::default(), Some(storage.clone()), clock.clone()).unwrap();
        let fetcher = fetcher();
        first
            .registry(fetcher.clone())
            .get_schema("nms:recipient")
            .await
            .unwrap()
            .unwrap();

        let second = ClientCaches::new(ClientConfig::default(), Some(storage), clock).unwrap();
        second
            .registry(fetcher.clone())
            .get_schema("nms:recipient")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_new_session_inherits_interface_from_storage() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorageBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let fetcher = fetcher();

        let first = ClientCaches::new(ClientConfig::default(), Some(storage.clone()), clock.clone()).unwrap();
        first.registry(fetcher.clone()).get_schema("xtk:session").await.unwrap().unwrap();

        let second = ClientCaches::new(ClientConfig::default(), Some(storage), clock).unwrap();
        let write = second
            .registry(fetcher.clone())
            .get_method("nms:delivery", "Write")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(write.urn, "xtk:persist|nms:delivery");
    }

    #[tokio::test]
    async fn test_method_invalidation_reaches_storage() {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemoryStorageBackend::new());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let first = ClientCaches::new(ClientConfig::default(), Some(storage.clone()), clock.clone()).unwrap();
        first.registry(fetcher()).get_schema("nms:delivery").await.unwrap().unwrap();

        let second = ClientCaches::new(ClientConfig::default(), Some(storage.clone()), clock.clone()).unwrap();
        second.methods().remove_entity("xtk:schema", "nms:delivery").await;
        assert!(second.methods().get("nms:delivery", "Prepare").await.is_none());

        let third = ClientCaches::new(ClientConfig::default(), Some(storage), clock).unwrap();
        assert!(third.methods().get("nms:delivery", "Prepare").await.is_none());
    }

    #[tokio::test]
    async fn test_renamed_schema_is_cached_under_requested_id() {
        let fetcher = Arc::new(MockSchemaFetcher::with(&[("nms:alias", RECIPIENT)]));
        let registry = registry(fetcher.clone());
        let schema = registry.get_schema("nms:alias").await.unwrap().unwrap();
        assert_eq!(schema.id(), "nms:recipient");
        registry.get_schema("nms:alias").await.unwrap().unwrap();
        registry.get_schema("nms:recipient").await.unwrap().unwrap();
        assert_eq!(fetcher.fetch_count(), 1);
    }
}
