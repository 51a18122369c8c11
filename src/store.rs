use std::sync::Arc;

use crate::entry::Entry;
use crate::key::CacheKey;

/// An entry store maps cache keys to their shared [`Entry`] cells.
///
/// Stores only own the key space. Everything about fetching and staleness
/// lives in the entry itself, so lookups are synchronous and never await.
pub trait EntryStore<V>: Send + Sync {
    /// A name for metrics/tracing.
    ///
    /// # Example
    /// - "hashmap"
    /// - "moka"
    fn name(&self) -> &'static str;

    /// Return the entry for `key`, if one exists.
    fn get(&self, key: &CacheKey) -> Option<Arc<Entry<V>>>;

    /// Return the entry for `key`, creating an empty one first if needed.
    ///
    /// Must be atomic: concurrent callers for the same key get the same entry.
    fn get_or_insert(&self, key: &CacheKey) -> Arc<Entry<V>>;

    /// Detach the entry for `key`. A fetch still running for it completes
    /// into the detached entry.
    fn remove(&self, key: &CacheKey);

    /// Detach every entry.
    fn clear(&self);

    /// Number of entries currently held.
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
