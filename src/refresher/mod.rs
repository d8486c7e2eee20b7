//! Cache refresher
//!
//! Polls the server for entities modified since the last poll and
//! invalidates the matching cache entries, or clears the whole cache when
//! the server asks for it. The refresher is a two-state machine:
//!
//! - `Polling`: each [`CacheRefresher::tick`] issues one reconciliation call
//! - `Idle`: ticks do nothing
//!
//! It starts in `Polling` and goes `Idle` on [`CacheRefresher::stop_refresh`]
//! or when the server does not support the reconciliation call. Ticks are
//! driven by the caller, or by [`CacheRefresher::spawn`] with the
//! `background-refresh` feature.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::convert::EntityAccess;
use crate::dom::Element;
use crate::transport::{MethodInvoker, SoapFault};

/// Urn of the reconciliation call
pub const REFRESH_URN: &str = "xtk:session";

/// Method name of the reconciliation call
pub const REFRESH_METHOD: &str = "GetModifiedEntities";

/// Default time between polls
pub const DEFAULT_REFRESH_PERIOD_SECS: i64 = 10;

/// A cache the refresher can invalidate
#[async_trait]
pub trait RefreshTarget: Send + Sync {
    /// Name used for the refresher's bookkeeping keys
    fn cache_name(&self) -> &str;

    /// Drop every entry
    async fn clear(&self);

    /// Drop the entries of one modified entity
    async fn remove_entity(&self, schema: &str, pk: &str);
}

/// Errors from a reconciliation poll
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RefreshError {
    #[error("Reconciliation call failed: {0}")]
    Invoke(#[from] SoapFault),

    #[error("Invalid reconciliation response: {0}")]
    InvalidResponse(String),
}

/// Refresher state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    Idle,
    Polling,
}

/// What a tick did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The refresher is idle; nothing was sent
    Skipped,
    /// The server asked for a full invalidation
    Cleared,
    /// Entities of the filtered schema that were invalidated, as `(schema, pk)`
    Removed(Vec<(String, String)>),
    /// The server does not support reconciliation; the refresher is now idle
    Disabled,
}

/// Last server position seen by a refresher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshMark {
    pub time: String,
    pub build_number: String,
}

#[derive(Debug, Clone)]
enum MarkState {
    Unloaded,
    Loaded(Option<RefreshMark>),
}

/// Poll-driven invalidation of one cache
pub struct CacheRefresher {
    target: Arc<dyn RefreshTarget>,
    invoker: Arc<dyn MethodInvoker>,
    metadata: Arc<MetadataCache>,
    schema_filter: String,
    period: Duration,
    state: Mutex<RefreshState>,
    mark: Mutex<MarkState>,
    #[cfg(feature = "background-refresh")]
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CacheRefresher {
    /// Create a refresher for `target`, invalidating entities of `schema_filter`
    pub fn new(
        target: Arc<dyn RefreshTarget>,
        invoker: Arc<dyn MethodInvoker>,
        metadata: Arc<MetadataCache>,
        schema_filter: impl Into<String>,
    ) -> Self {
        let refresher = Self {
            target,
            invoker,
            metadata,
            schema_filter: schema_filter.into(),
            period: Duration::seconds(DEFAULT_REFRESH_PERIOD_SECS),
            state: Mutex::new(RefreshState::Polling),
            mark: Mutex::new(MarkState::Unloaded),
            #[cfg(feature = "background-refresh")]
            task: Mutex::new(None),
        };
        info!(
            "Refresher for {} ({}) started polling",
            refresher.target.cache_name(),
            refresher.schema_filter
        );
        refresher
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn schema_filter(&self) -> &str {
        &self.schema_filter
    }

    pub fn state(&self) -> RefreshState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_polling(&self) -> bool {
        self.state() == RefreshState::Polling
    }

    fn set_state(&self, state: RefreshState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn metadata_key(&self) -> String {
        format!("refresher.{}.{}", self.target.cache_name(), self.schema_filter)
    }

    /// Stop polling; further ticks are skipped
    pub fn stop_refresh(&self) {
        if self.state() == RefreshState::Polling {
            info!("Refresher for {} stopped", self.target.cache_name());
        }
        self.set_state(RefreshState::Idle);
        self.abort_task();
    }

    #[cfg(feature = "background-refresh")]
    fn abort_task(&self) {
        if let Some(task) = self.task.lock().unwrap_or_else(PoisonError::into_inner).take() {
            task.abort();
        }
    }

    #[cfg(not(feature = "background-refresh"))]
    fn abort_task(&self) {}

    /// Last server position, loading it from the metadata cache on first use
    pub async fn last_mark(&self) -> Option<RefreshMark> {
        let current = self.mark.lock().unwrap_or_else(PoisonError::into_inner).clone();
        if let MarkState::Loaded(mark) = current {
            return mark;
        }
        let loaded = self.metadata.get_as::<RefreshMark>(&self.metadata_key()).await;
        let mut state = self.mark.lock().unwrap_or_else(PoisonError::into_inner);
        // A concurrent tick may have stored a newer mark meanwhile
        if let MarkState::Loaded(mark) = &*state {
            return mark.clone();
        }
        *state = MarkState::Loaded(loaded.clone());
        loaded
    }

    async fn store_mark(&self, mark: RefreshMark) {
        self.metadata.put_as(&self.metadata_key(), &mark).await;
        *self.mark.lock().unwrap_or_else(PoisonError::into_inner) = MarkState::Loaded(Some(mark));
    }

    fn build_request(&self, mark: Option<&RefreshMark>) -> Element {
        let mut cache = Element::new("cache");
        if let Some(mark) = mark {
            cache.set_attribute("time", mark.time.as_str());
            cache.set_attribute("buildNumber", mark.build_number.as_str());
        }
        cache.with_child(Element::new("entityCache").with_attribute("schema", self.schema_filter.as_str()))
    }

    /// Run one reconciliation poll
    ///
    /// Failures other than "unsupported method" are returned and leave the
    /// refresher polling.
    pub async fn tick(&self) -> Result<RefreshOutcome, RefreshError> {
        if !self.is_polling() {
            return Ok(RefreshOutcome::Skipped);
        }
        let mark = self.last_mark().await;
        let request = self.build_request(mark.as_ref());

        let response = match self
            .invoker
            .invoke(REFRESH_URN, REFRESH_METHOD, vec![request])
            .await
        {
            Ok(response) => response,
            Err(fault) if fault.is_unsupported_method() => {
                info!(
                    "Server does not support {}#{}; refresher for {} is now idle",
                    REFRESH_URN,
                    REFRESH_METHOD,
                    self.target.cache_name()
                );
                self.stop_refresh();
                return Ok(RefreshOutcome::Disabled);
            }
            Err(fault) => {
                warn!("Refresh poll for {} failed: {}", self.target.cache_name(), fault);
                return Err(fault.into());
            }
        };

        let cache = if response.name == "cache" {
            &response
        } else {
            response.first_child("cache").ok_or_else(|| {
                RefreshError::InvalidResponse(format!("expected a <cache> element, got <{}>", response.name))
            })?
        };
        let time = cache.get_attribute_as_string("time");
        if time.is_empty() {
            return Err(RefreshError::InvalidResponse("missing time attribute".to_string()));
        }
        self.store_mark(RefreshMark {
            time,
            build_number: cache.get_attribute_as_string("buildNumber"),
        })
        .await;

        if cache.get_attribute_as_boolean("emptyCache") {
            debug!("Server requested a full clear of {}", self.target.cache_name());
            self.target.clear().await;
            return Ok(RefreshOutcome::Cleared);
        }

        let mut removed = Vec::new();
        for entity in cache.get_child_elements(Some("entityCache")) {
            let schema = entity.get_attribute_as_string("schema");
            if schema != self.schema_filter {
                continue;
            }
            let pk = entity.get_attribute_as_string("pk");
            if pk.is_empty() {
                continue;
            }
            self.target.remove_entity(&schema, &pk).await;
            removed.push((schema, pk));
        }
        if !removed.is_empty() {
            debug!(
                "Invalidated {} entries of {} in {}",
                removed.len(),
                self.schema_filter,
                self.target.cache_name()
            );
        }
        Ok(RefreshOutcome::Removed(removed))
    }

    /// Tick every period on the tokio runtime until stopped
    ///
    /// The first poll happens one period after the call.
    #[cfg(feature = "background-refresh")]
    pub fn spawn(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let period = self
            .period
            .to_std()
            .unwrap_or(std::time::Duration::from_secs(DEFAULT_REFRESH_PERIOD_SECS as u64));
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(refresher) = weak.upgrade() else {
                    break;
                };
                if !refresher.is_polling() {
                    break;
                }
                // Failures are logged by tick; keep polling
                let _ = refresher.tick().await;
            }
        });
        let previous = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }
}

impl std::fmt::Debug for CacheRefresher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRefresher")
            .field("cache", &self.target.cache_name())
            .field("schema_filter", &self.schema_filter)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheOptions;
    use crate::transport::MockInvoker;

    #[derive(Default)]
    struct RecordingTarget {
        cleared: Mutex<usize>,
        removed: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl RefreshTarget for RecordingTarget {
        fn cache_name(&self) -> &str {
            "Recording"
        }

        async fn clear(&self) {
            *self.cleared.lock().unwrap() += 1;
        }

        async fn remove_entity(&self, schema: &str, pk: &str) {
            self.removed
                .lock()
                .unwrap()
                .push((schema.to_string(), pk.to_string()));
        }
    }

    fn setup() -> (Arc<RecordingTarget>, Arc<MockInvoker>, CacheRefresher) {
        let target = Arc::new(RecordingTarget::default());
        let invoker = Arc::new(MockInvoker::new());
        let metadata = Arc::new(MetadataCache::new(&CacheOptions::default()));
        let refresher = CacheRefresher::new(target.clone(), invoker.clone(), metadata, "xtk:schema");
        (target, invoker, refresher)
    }

    #[tokio::test]
    async fn test_first_call_omits_mark() {
        let (_target, invoker, refresher) = setup();
        invoker.push_response(Ok(Element::parse(r#"<cache time="t1" buildNumber="9500"/>"#).unwrap()));
        invoker.push_response(Ok(Element::parse(r#"<cache time="t2" buildNumber="9500"/>"#).unwrap()));

        refresher.tick().await.unwrap();
        refresher.tick().await.unwrap();

        let calls = invoker.calls();
        assert_eq!(calls[0].urn, REFRESH_URN);
        assert_eq!(calls[0].method, REFRESH_METHOD);
        assert!(calls[0].args[0].attribute("time").is_none());
        assert_eq!(calls[1].args[0].attribute("time"), Some("t1"));
        assert_eq!(calls[1].args[0].attribute("buildNumber"), Some("9500"));
        assert_eq!(
            calls[1].args[0].first_child("entityCache").unwrap().attribute("schema"),
            Some("xtk:schema")
        );
    }

    #[tokio::test]
    async fn test_filtered_removal() {
        let (target, invoker, refresher) = setup();
        invoker.push_response(Ok(Element::parse(
            r#"<cache time="t1" buildNumber="9500">
                 <entityCache pk="nms:recipient" schema="xtk:schema"/>
                 <entityCache pk="NmsBroadcast" schema="xtk:option"/>
               </cache>"#,
        )
        .unwrap()));

        let outcome = refresher.tick().await.unwrap();
        assert_eq!(
            outcome,
            RefreshOutcome::Removed(vec![("xtk:schema".to_string(), "nms:recipient".to_string())])
        );
        assert_eq!(target.removed.lock().unwrap().len(), 1);
        assert_eq!(*target.cleared.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsupported_method_goes_idle() {
        let (_target, invoker, refresher) = setup();
        invoker.push_response(Err(SoapFault::fault(
            "SOP-330011",
            "XSV-350008 Method 'GetModifiedEntities' not found",
        )));
        assert_eq!(refresher.tick().await.unwrap(), RefreshOutcome::Disabled);
        assert_eq!(refresher.state(), RefreshState::Idle);
        assert_eq!(refresher.tick().await.unwrap(), RefreshOutcome::Skipped);
        assert_eq!(invoker.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_other_faults_keep_polling() {
        let (_target, invoker, refresher) = setup();
        invoker.push_response(Err(SoapFault::Transport("connection reset".to_string())));
        assert!(refresher.tick().await.is_err());
        assert!(refresher.is_polling());
    }
}
