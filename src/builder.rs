//! Builder API for creating result cache instances.
//!
//! The builder picks the entry store and wires optional timeouts and metrics,
//! so callers own one explicitly constructed cache instead of a global.

use std::sync::Arc;
use std::time::Duration;

use crate::config::CacheConfig;
use crate::metrics::MetricsSink;
use crate::store::EntryStore;
use crate::stores::memory::HashMapStore;
use crate::stores::moka::{MokaStore, MokaStoreConfig};
use crate::swr::SwrCache;

/// Builder for [`SwrCache`] instances.
///
/// # Example
///
/// ```ignore
/// use swr_fetch::CacheBuilder;
/// use std::time::Duration;
///
/// let cache = CacheBuilder::new()
///     .max_entries(1_000)
///     .fetch_timeout(Duration::from_secs(5))
///     .build::<String>();
/// ```
#[derive(Clone, Default)]
pub struct CacheBuilder {
    max_entries: Option<u64>,
    fetch_timeout: Option<Duration>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl CacheBuilder {
    /// Create a new CacheBuilder for an unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a builder from a [`CacheConfig`].
    pub fn from_config(config: &CacheConfig) -> Self {
        CacheBuilder {
            max_entries: config.max_entries,
            fetch_timeout: config.fetch_timeout_ms.map(Duration::from_millis),
            metrics: None,
        }
    }

    /// Bound the number of keys, switching to the moka-backed store.
    pub fn max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    pub fn metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Build the cache.
    pub fn build<V>(self) -> SwrCache<V>
    where
        V: Clone + Send + Sync + 'static,
    {
        let store: Arc<dyn EntryStore<V>> = match self.max_entries {
            Some(max_capacity) => Arc::new(MokaStore::new(MokaStoreConfig { max_capacity })),
            None => Arc::new(HashMapStore::new()),
        };

        tracing::debug!(
            store = store.name(),
            max_entries = ?self.max_entries,
            fetch_timeout = ?self.fetch_timeout,
            "building result cache"
        );

        let mut cache = SwrCache::new(store);
        if let Some(timeout) = self.fetch_timeout {
            cache = cache.with_fetch_timeout(timeout);
        }
        if let Some(sink) = self.metrics {
            cache = cache.with_metrics(sink);
        }
        cache
    }
}
