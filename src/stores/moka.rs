use moka::notification::RemovalCause;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::entry::Entry;
use crate::key::CacheKey;
use crate::store::EntryStore;

/// Dead references are swept once the map grows past this many keys.
const SWEEP_FLOOR: usize = 1_024;

/// Weak references to every entry the store has handed out.
struct Handed<V> {
    entries: HashMap<CacheKey, Weak<Entry<V>>>,
    sweep_at: usize,
}

impl<V> Handed<V> {
    fn new() -> Self {
        Handed {
            entries: HashMap::new(),
            sweep_at: SWEEP_FLOOR,
        }
    }

    fn upgrade(&self, key: &CacheKey) -> Option<Arc<Entry<V>>> {
        self.entries.get(key).and_then(Weak::upgrade)
    }

    fn insert(&mut self, key: CacheKey, entry: &Arc<Entry<V>>) {
        if self.entries.len() >= self.sweep_at {
            self.sweep();
            self.sweep_at = (self.entries.len() * 2).max(SWEEP_FLOOR);
        }
        self.entries.insert(key, Arc::downgrade(entry));
    }

    fn sweep(&mut self) {
        self.entries.retain(|_, weak| weak.strong_count() > 0);
    }
}

/// Configuration for MokaStore.
#[derive(Debug, Clone)]
pub struct MokaStoreConfig {
    /// Maximum number of entries the store can hold.
    pub max_capacity: u64,
}

impl Default for MokaStoreConfig {
    fn default() -> Self {
        MokaStoreConfig {
            max_capacity: 10_000,
        }
    }
}

/// Bounded concurrent entry store using Moka.
///
/// Keeps the key space from growing without limit when callers produce many
/// distinct option strings.
///
/// Moka may evict an entry whose fetch is still running. The store remembers
/// every entry it hands out by weak reference, and a running fetch keeps its
/// entry alive, so the next caller for that key gets the same entry back
/// instead of a fresh one. An evicted entry is gone for good once nothing
/// holds it any more.
pub struct MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    cache: Cache<CacheKey, Arc<Entry<V>>>,
    handed: Mutex<Handed<V>>,
}

impl<V> MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new MokaStore with the given configuration.
    ///
    /// # Example
    /// ```ignore
    /// let store: MokaStore<Arc<ApiResponse>> = MokaStore::new(MokaStoreConfig {
    ///     max_capacity: 1_000,
    /// });
    /// ```
    pub fn new(config: MokaStoreConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_capacity)
            .eviction_listener(|key: Arc<CacheKey>, entry: Arc<Entry<V>>, cause| {
                if matches!(cause, RemovalCause::Size) && entry.is_fetching() {
                    tracing::debug!(%key, "evicted entry kept until its fetch settles");
                }
            })
            .build();

        MokaStore {
            cache,
            handed: Mutex::new(Handed::new()),
        }
    }

    fn handed(&self) -> MutexGuard<'_, Handed<V>> {
        self.handed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Entries evicted from moka that are still held elsewhere.
    fn detached(&self) -> u64 {
        let held: Vec<CacheKey> = {
            let mut handed = self.handed();
            handed.sweep();
            handed.entries.keys().cloned().collect()
        };

        held.iter()
            .filter(|key| !self.cache.contains_key(*key))
            .count() as u64
    }
}

impl<V> EntryStore<V> for MokaStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "moka"
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<Entry<V>>> {
        self.cache.get(key).or_else(|| self.handed().upgrade(key))
    }

    fn get_or_insert(&self, key: &CacheKey) -> Arc<Entry<V>> {
        // Concurrent initializations of the same key are coalesced.
        self.cache.get_with_by_ref(key, || {
            let mut handed = self.handed();
            if let Some(entry) = handed.upgrade(key) {
                return entry;
            }

            let entry = Arc::new(Entry::new());
            handed.insert(key.clone(), &entry);
            entry
        })
    }

    fn remove(&self, key: &CacheKey) {
        self.handed().entries.remove(key);
        self.cache.invalidate(key);
    }

    fn clear(&self) {
        self.handed().entries.clear();
        self.cache.invalidate_all();
        self.cache.run_pending_tasks();
    }

    fn len(&self) -> u64 {
        // Moka updates its counters lazily.
        self.cache.run_pending_tasks();
        self.cache.entry_count() + self.detached()
    }
}
