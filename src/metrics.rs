//! Metrics hooks for the result cache.
//!
//! [`SwrCache`](crate::SwrCache) reports how each lookup was served and how
//! each fetch ended to an optional user-provided sink.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use swr_fetch::{CacheBuilder, CacheEvent, MetricsSink};
//!
//! let sink = Arc::new(MyMetricsSink::new());
//! let cache = CacheBuilder::new().metrics(sink.clone()).build::<String>();
//! ```

use async_trait::async_trait;

use crate::entry::{FetchKind, Lookup};

/// Events emitted by the cache.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEvent {
    /// Emitted on every `get`.
    Lookup {
        /// The cache key, in display form.
        key: String,
        /// How the call was served.
        lookup: Lookup,
        /// Name of the entry store (from `EntryStore::name()`).
        store: &'static str,
    },
    /// Emitted once per fetch when it settles.
    Fetch {
        /// The cache key, in display form.
        key: String,
        /// Whether this was a cold fetch or a background refresh.
        kind: FetchKind,
        /// Whether the fetch produced a value.
        ok: bool,
        /// Time from start to settlement in milliseconds.
        latency_ms: f64,
    },
}

/// Trait for receiving cache events.
///
/// # Example
///
/// ```ignore
/// use std::sync::Mutex;
/// use async_trait::async_trait;
/// use swr_fetch::{CacheEvent, MetricsSink};
///
/// struct BufferedSink {
///     buffer: Mutex<Vec<CacheEvent>>,
/// }
///
/// #[async_trait]
/// impl MetricsSink for BufferedSink {
///     fn emit(&self, event: CacheEvent) {
///         self.buffer.lock().unwrap().push(event);
///     }
///
///     async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
///         let events = std::mem::take(&mut *self.buffer.lock().unwrap());
///         ship(events).await
///     }
/// }
/// ```
#[async_trait]
pub trait MetricsSink: Send + Sync {
    /// Emit a single event.
    ///
    /// This is called synchronously in the hot path of `get`.
    /// Implementations should be fast (e.g., buffer events in memory).
    fn emit(&self, event: CacheEvent);

    /// Flush any buffered events. Called by [`SwrCache::flush_metrics`](crate::SwrCache::flush_metrics).
    async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        Ok(())
    }
}

/// Sink that writes every event to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

#[async_trait]
impl MetricsSink for TracingSink {
    fn emit(&self, event: CacheEvent) {
        match event {
            CacheEvent::Lookup { key, lookup, store } => {
                tracing::debug!(%key, ?lookup, store, "cache lookup");
            }
            CacheEvent::Fetch {
                key,
                kind,
                ok,
                latency_ms,
            } => {
                tracing::debug!(%key, ?kind, ok, latency_ms, "cache fetch settled");
            }
        }
    }
}
