use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::entry::Entry;
use crate::key::CacheKey;
use crate::store::EntryStore;

/// Unbounded in-memory entry store using a HashMap behind a Mutex.
///
/// Entries live until they are removed explicitly. This matches a
/// process-lifetime memo: one entry per distinct options string, never evicted.
///
/// For a bounded key space use `MokaStore` instead.
pub struct HashMapStore<V> {
    state: Mutex<HashMap<CacheKey, Arc<Entry<V>>>>,
}

impl<V> HashMapStore<V> {
    pub fn new() -> Self {
        HashMapStore {
            state: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<Entry<V>>>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<V> Default for HashMapStore<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> EntryStore<V> for HashMapStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &'static str {
        "hashmap"
    }

    fn get(&self, key: &CacheKey) -> Option<Arc<Entry<V>>> {
        self.lock().get(key).cloned()
    }

    fn get_or_insert(&self, key: &CacheKey) -> Arc<Entry<V>> {
        let mut state = self.lock();
        if let Some(entry) = state.get(key) {
            return Arc::clone(entry);
        }

        let entry = Arc::new(Entry::new());
        state.insert(key.clone(), Arc::clone(&entry));
        entry
    }

    fn remove(&self, key: &CacheKey) {
        self.lock().remove(key);
    }

    fn clear(&self) {
        self.lock().clear();
    }

    fn len(&self) -> u64 {
        self.lock().len() as u64
    }
}
