use futures::FutureExt;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::entry::{FetchKind, Pending, Reservation};
use crate::error::CacheError;
use crate::key::CacheKey;
use crate::metrics::{CacheEvent, MetricsSink};
use crate::store::EntryStore;

/// Stale-while-revalidate result cache with in-flight de-duplication.
///
/// Every key holds at most one promise. The first call for a key fetches and
/// shares that fetch with every concurrent caller. Once a value exists, each
/// call returns it immediately and starts a background refresh, unless one is
/// already running. A refresh replaces the stored promise only after it settles.
///
/// Clones share the same entries; create one cache at service start and hand
/// it to whoever needs it.
pub struct SwrCache<V> {
    store: Arc<dyn EntryStore<V>>,
    fetch_timeout: Option<Duration>,
    metrics: Option<Arc<dyn MetricsSink>>,
}

impl<V> Clone for SwrCache<V> {
    fn clone(&self) -> Self {
        SwrCache {
            store: Arc::clone(&self.store),
            fetch_timeout: self.fetch_timeout,
            metrics: self.metrics.clone(),
        }
    }
}

impl<V> SwrCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new cache over the given entry store.
    pub fn new(store: Arc<dyn EntryStore<V>>) -> Self {
        SwrCache {
            store,
            fetch_timeout: None,
            metrics: None,
        }
    }

    /// Fail any fetch that has not settled after `timeout`.
    ///
    /// Without a timeout a fetch that never settles keeps its key in the
    /// fetching state forever, and that key is never refreshed again.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// Report lookups and fetches to `sink`.
    pub fn with_metrics(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(sink);
        self
    }

    /// Return the promise for `key`, fetching with `fetcher` when needed.
    ///
    /// - No value yet: `fetcher` is started and its promise is stored and returned.
    ///   Concurrent callers share it, and a failure reaches all of them.
    /// - Value present, nothing in flight: the stored promise is returned and
    ///   `fetcher` is started in the background to replace it.
    /// - Fetch in flight: the stored promise is returned and `fetcher` is not called.
    ///
    /// A failed background refresh is logged and the stale value is kept.
    /// The fetching flag is set before this returns, so there is no window in
    /// which a second caller could start a duplicate fetch.
    ///
    /// `fetcher` runs after the entry is unlocked. If it panics, the entry is
    /// settled as a failed fetch before the panic leaves this call. Fetches run
    /// as spawned tasks and are never cancelled, even if every caller drops its
    /// promise.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn get<F, Fut, E>(&self, key: CacheKey, fetcher: F) -> Pending<V>
    where
        F: FnOnce(CacheKey) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let label = key.to_string();
        let entry = self.store.get_or_insert(&key);
        let (promise, lookup, reservation) = entry.acquire(&label);

        tracing::trace!(key = %label, ?lookup, "served cache lookup");
        if let Some(metrics) = &self.metrics {
            metrics.emit(CacheEvent::Lookup {
                key: label.clone(),
                lookup,
                store: self.store.name(),
            });
        }

        if let Some(reservation) = reservation {
            self.spawn_fetch(reservation, label, key, fetcher);
        }

        promise
    }

    /// Like [`get`](Self::get), awaiting the returned promise.
    pub async fn get_value<F, Fut, E>(&self, key: CacheKey, fetcher: F) -> Result<V, CacheError>
    where
        F: FnOnce(CacheKey) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.get(key, fetcher).await
    }

    /// Whether a fetch is currently in flight for `key`.
    pub fn is_fetching(&self, key: &CacheKey) -> bool {
        self.store.get(key).is_some_and(|entry| entry.is_fetching())
    }

    /// Whether `key` has a promise that callers are served from.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.store.get(key).is_some_and(|entry| entry.has_promise())
    }

    /// Detach the entry for `key`. The next call fetches cold.
    pub fn remove(&self, key: &CacheKey) {
        self.store.remove(key);
    }

    /// Detach every entry.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Number of keys held by the store.
    pub fn len(&self) -> u64 {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Flush the metrics sink. Does nothing without one.
    pub async fn flush_metrics(&self) -> Result<(), CacheError> {
        match &self.metrics {
            Some(metrics) => metrics
                .flush()
                .await
                .map_err(|e| CacheError::Metrics(e.to_string())),
            None => Ok(()),
        }
    }

    /// Start `fetcher` and spawn a task that settles `reservation` with its result.
    fn spawn_fetch<F, Fut, E>(
        &self,
        reservation: Reservation<V>,
        label: String,
        key: CacheKey,
        fetcher: F,
    ) where
        F: FnOnce(CacheKey) -> Fut,
        Fut: Future<Output = Result<V, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let kind = reservation.kind();
        tracing::debug!(key = %label, ?kind, "starting fetch");

        // A panic here unwinds through `reservation`, which settles the entry.
        let fetch = fetcher(key);
        let fetch_timeout = self.fetch_timeout;
        let metrics = self.metrics.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let result = run_fetch(&label, fetch, fetch_timeout).await;

            match (&result, kind) {
                (Err(e), FetchKind::Refresh) => {
                    tracing::warn!(key = %label, error = %e, "background refresh failed, keeping stale value");
                }
                (Err(e), FetchKind::Cold) => {
                    tracing::debug!(key = %label, error = %e, "fetch failed");
                }
                (Ok(_), _) => {
                    tracing::debug!(key = %label, ?kind, "fetch settled");
                }
            }

            if let Some(metrics) = &metrics {
                metrics.emit(CacheEvent::Fetch {
                    key: label,
                    kind,
                    ok: result.is_ok(),
                    latency_ms: started.elapsed().as_secs_f64() * 1000.0,
                });
            }

            reservation.complete(result);
        });
    }
}

/// Run a fetch to completion, bounded by `timeout` if one is set.
async fn run_fetch<V, Fut, E>(
    key: &str,
    fetch: Fut,
    timeout: Option<Duration>,
) -> Result<V, CacheError>
where
    Fut: Future<Output = Result<V, E>>,
    E: Display,
{
    let outcome = match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, fetch).await {
            Ok(outcome) => outcome,
            Err(_) => return Err(CacheError::timeout(key, millis(timeout))),
        },
        None => fetch.await,
    };

    outcome.map_err(|e| CacheError::fetch(key, e.to_string()))
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Lookup;
    use crate::stores::memory::HashMapStore;
    use async_trait::async_trait;
    use futures::future::join_all;
    use std::panic::AssertUnwindSafe;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn new_cache() -> SwrCache<String> {
        SwrCache::new(Arc::new(HashMapStore::new()))
    }

    fn key(options: &str) -> CacheKey {
        CacheKey::from_parts("postsPublic", "browse", options)
    }

    /// Fetcher that counts how often it is invoked and resolves immediately.
    fn counting(
        count: &Arc<AtomicUsize>,
        value: &str,
    ) -> impl FnOnce(CacheKey) -> futures::future::Ready<Result<String, String>> {
        let count = count.clone();
        let value = value.to_string();
        move |_key| {
            count.fetch_add(1, Ordering::SeqCst);
            futures::future::ready(Ok(value))
        }
    }

    /// Fetcher that resolves to `value` once `gate` fires.
    fn gated(
        count: &Arc<AtomicUsize>,
        value: &str,
        gate: oneshot::Receiver<()>,
    ) -> impl FnOnce(CacheKey) -> futures::future::BoxFuture<'static, Result<String, String>>
    {
        let count = count.clone();
        let value = value.to_string();
        move |_key| {
            count.fetch_add(1, Ordering::SeqCst);
            async move {
                gate.await.map_err(|_| "gate dropped".to_string())?;
                Ok(value)
            }
            .boxed()
        }
    }

    async fn wait_until_idle(cache: &SwrCache<String>, key: &CacheKey) {
        for _ in 0..100 {
            if !cache.is_fetching(key) {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("fetch for {} never settled", key);
    }

    #[tokio::test]
    async fn test_cold_key_fetches_once() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        let value = cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();

        assert_eq!(value, "first");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_calls_share_one_fetch() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let first = cache.get(key("{}"), gated(&count, "first", rx));
        let mut promises = vec![first];
        for _ in 0..9 {
            let (_unused_tx, unused_rx) = oneshot::channel();
            promises.push(cache.get(key("{}"), gated(&count, "other", unused_rx)));
        }

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(cache.is_fetching(&key("{}")));

        tx.send(()).unwrap();
        for value in join_all(promises).await {
            assert_eq!(value.unwrap(), "first");
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolved_key_returns_stale_and_refreshes() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        let (tx, rx) = oneshot::channel();
        let value = cache
            .get_value(key("{}"), gated(&count, "second", rx))
            .await
            .unwrap();

        // The previous value is served while the refresh runs.
        assert_eq!(value, "first");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(cache.is_fetching(&key("{}")));

        // Further calls during the refresh do not fetch again.
        let value = cache
            .get_value(key("{}"), counting(&count, "third"))
            .await
            .unwrap();
        assert_eq!(value, "first");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        tx.send(()).unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        // The refreshed value is served from now on.
        let value = cache
            .get_value(key("{}"), counting(&count, "fourth"))
            .await
            .unwrap();
        assert_eq!(value, "second");
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_keys_do_not_share_state() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let a = cache.get(key(r#"{"page":1}"#), gated(&count, "page-1", rx));
        let b = cache
            .get_value(key(r#"{"page":2}"#), counting(&count, "page-2"))
            .await
            .unwrap();

        assert_eq!(b, "page-2");
        assert_eq!(count.load(Ordering::SeqCst), 2);
        assert!(cache.is_fetching(&key(r#"{"page":1}"#)));
        assert!(!cache.is_fetching(&key(r#"{"page":2}"#)));

        tx.send(()).unwrap();
        assert_eq!(a.await.unwrap(), "page-1");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_stale_value() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        let value = cache
            .get_value(key("{}"), |_key| async {
                Err::<String, _>("database unavailable")
            })
            .await
            .unwrap();
        assert_eq!(value, "first");

        wait_until_idle(&cache, &key("{}")).await;

        // The flag was cleared, so the next call refreshes again.
        let value = cache
            .get_value(key("{}"), counting(&count, "second"))
            .await
            .unwrap();
        assert_eq!(value, "first");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_cold_fetch_propagates_and_retries() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        let err = cache
            .get_value(key("{}"), |_key| async {
                Err::<String, _>("database unavailable")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Fetch { .. }));

        wait_until_idle(&cache, &key("{}")).await;
        assert!(!cache.contains(&key("{}")));

        let value = cache
            .get_value(key("{}"), counting(&count, "recovered"))
            .await
            .unwrap();
        assert_eq!(value, "recovered");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout_settles_hung_fetch() {
        let cache = new_cache().with_fetch_timeout(Duration::from_millis(500));

        let err = cache
            .get_value(key("{}"), |_key| {
                futures::future::pending::<Result<String, String>>()
            })
            .await
            .unwrap_err();

        assert_eq!(err, CacheError::timeout(key("{}").to_string(), 500));
        wait_until_idle(&cache, &key("{}")).await;
        assert!(!cache.is_fetching(&key("{}")));
    }

    #[tokio::test]
    async fn test_panicking_fetch_is_aborted_and_cleared() {
        let cache = new_cache();

        let err = cache
            .get_value(key("{}"), |_key| async {
                if true {
                    panic!("fetch exploded");
                }
                Ok::<String, String>("unreachable".to_string())
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Aborted { .. }));
        assert!(!cache.is_fetching(&key("{}")));
        assert!(!cache.contains(&key("{}")));
    }

    #[tokio::test]
    async fn test_stale_promise_is_ready_without_waiting() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        let (_tx, rx) = oneshot::channel();
        let stale = cache.get(key("{}"), gated(&count, "second", rx));
        assert_eq!(stale.now_or_never(), Some(Ok("first".to_string())));
        assert!(cache.is_fetching(&key("{}")));
    }

    /// Fetcher that panics before returning a future.
    fn exploding(_key: CacheKey) -> futures::future::Ready<Result<String, String>> {
        panic!("fetcher exploded")
    }

    #[tokio::test]
    async fn test_fetcher_panic_on_refresh_clears_flag() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            cache.get(key("{}"), exploding)
        }));
        assert!(outcome.is_err());
        assert!(!cache.is_fetching(&key("{}")));

        // The stale value survives and the next call refreshes again.
        let value = cache
            .get_value(key("{}"), counting(&count, "second"))
            .await
            .unwrap();
        assert_eq!(value, "first");
        assert_eq!(count.load(Ordering::SeqCst), 2);

        wait_until_idle(&cache, &key("{}")).await;
        let value = cache
            .get_value(key("{}"), counting(&count, "third"))
            .await
            .unwrap();
        assert_eq!(value, "second");
    }

    #[tokio::test]
    async fn test_fetcher_panic_on_cold_fetch_resets_entry() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
            cache.get(key("{}"), exploding)
        }));
        assert!(outcome.is_err());
        assert!(!cache.is_fetching(&key("{}")));
        assert!(!cache.contains(&key("{}")));

        let value = cache
            .get_value(key("{}"), counting(&count, "recovered"))
            .await
            .unwrap();
        assert_eq!(value, "recovered");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(Duration::from_millis(250)), 250);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_remove_forces_cold_fetch() {
        let cache = new_cache();
        let count = Arc::new(AtomicUsize::new(0));

        cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        cache.remove(&key("{}"));
        assert!(cache.is_empty());

        let value = cache
            .get_value(key("{}"), counting(&count, "second"))
            .await
            .unwrap();
        assert_eq!(value, "second");
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    struct TestSink {
        events: Mutex<Vec<CacheEvent>>,
        flushes: AtomicUsize,
        fail_flush: bool,
    }

    impl TestSink {
        fn new() -> Self {
            TestSink {
                events: Mutex::new(Vec::new()),
                flushes: AtomicUsize::new(0),
                fail_flush: false,
            }
        }

        fn take_events(&self) -> Vec<CacheEvent> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    #[async_trait]
    impl MetricsSink for TestSink {
        fn emit(&self, event: CacheEvent) {
            self.events.lock().unwrap().push(event);
        }

        async fn flush(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.flushes.fetch_add(1, Ordering::SeqCst);
            if self.fail_flush {
                return Err("collector unreachable".into());
            }
            Ok(())
        }
    }

    fn lookups(events: &[CacheEvent]) -> Vec<Lookup> {
        events
            .iter()
            .filter_map(|event| match event {
                CacheEvent::Lookup { lookup, .. } => Some(*lookup),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_metrics_report_lookups_and_fetches() {
        let sink = Arc::new(TestSink::new());
        let cache = new_cache().with_metrics(sink.clone());
        let count = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        cache
            .get_value(key("{}"), counting(&count, "first"))
            .await
            .unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        let _stale = cache.get(key("{}"), gated(&count, "second", rx));
        let _joined = cache.get(key("{}"), counting(&count, "third"));
        tx.send(()).unwrap();
        wait_until_idle(&cache, &key("{}")).await;

        let events = sink.take_events();
        assert_eq!(
            lookups(&events),
            vec![Lookup::Miss, Lookup::Stale, Lookup::Joined]
        );

        let fetches: Vec<_> = events
            .iter()
            .filter_map(|event| match event {
                CacheEvent::Fetch { kind, ok, .. } => Some((*kind, *ok)),
                _ => None,
            })
            .collect();
        assert_eq!(
            fetches,
            vec![(FetchKind::Cold, true), (FetchKind::Refresh, true)]
        );

        match &events[0] {
            CacheEvent::Lookup { key, store, .. } => {
                assert_eq!(key, "postsPublic::browse::{}");
                assert_eq!(*store, "hashmap");
            }
            _ => panic!("Expected Lookup event"),
        }
    }

    #[tokio::test]
    async fn test_flush_metrics_reaches_sink() {
        assert!(new_cache().flush_metrics().await.is_ok());

        let sink = Arc::new(TestSink::new());
        let cache = new_cache().with_metrics(sink.clone());
        cache.flush_metrics().await.unwrap();
        assert_eq!(sink.flushes.load(Ordering::SeqCst), 1);

        let failing = Arc::new(TestSink {
            fail_flush: true,
            ..TestSink::new()
        });
        let err = new_cache()
            .with_metrics(failing)
            .flush_metrics()
            .await
            .unwrap_err();
        assert_eq!(err, CacheError::Metrics("collector unreachable".to_string()));
    }
}
