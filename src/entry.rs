use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

use crate::error::CacheError;

/// A cached promise: a cloneable future that every caller awaits for the same result.
pub type Pending<V> = Shared<BoxFuture<'static, Result<V, CacheError>>>;

/// Build a promise that is already resolved to `value`.
pub(crate) fn resolved<V>(value: V) -> Pending<V>
where
    V: Clone + Send + Sync + 'static,
{
    futures::future::ready(Ok(value)).boxed().shared()
}

/// Why a fetch was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// First fetch for a key with no usable value.
    Cold,
    /// Background refresh of a key that already holds a value.
    Refresh,
}

/// How a `get` call was served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// No value yet: a cold fetch was started and its promise returned.
    Miss,
    /// The stored value was returned and a refresh was started.
    Stale,
    /// A fetch was already running: the stored promise was returned, nothing started.
    Joined,
}

struct EntryState<V> {
    is_fetching: bool,
    promise: Option<Pending<V>>,
}

/// One cache entry per key.
///
/// All transitions happen under the entry lock, so checking and setting the
/// fetching flag is a single atomic step. The lock is never held while user
/// code runs.
pub struct Entry<V> {
    state: Mutex<EntryState<V>>,
}

/// The right to run the one fetch of an entry.
///
/// Handed out by [`Entry::acquire`] with the fetching flag already set.
/// Dropping it settles the entry: with the result passed to
/// [`complete`](Self::complete), or as a fetch that produced nothing when it
/// is dropped early (a panicking fetcher, a task that never ran).
pub(crate) struct Reservation<V>
where
    V: Clone + Send + Sync + 'static,
{
    entry: Arc<Entry<V>>,
    kind: FetchKind,
    /// Feeds the promise handed to cold callers. `None` for a refresh.
    sender: Option<oneshot::Sender<Result<V, CacheError>>>,
    result: Option<Result<V, CacheError>>,
}

impl<V> Reservation<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub(crate) fn kind(&self) -> FetchKind {
        self.kind
    }

    /// Settle the entry with the fetch result.
    pub(crate) fn complete(mut self, result: Result<V, CacheError>) {
        self.result = Some(result);
    }
}

impl<V> Drop for Reservation<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        let result = self.result.take();
        self.entry.settle(self.kind, result.as_ref());

        // Cold callers wake after the entry is settled. A dropped sender
        // resolves their promise to `Aborted`.
        if let (Some(sender), Some(result)) = (self.sender.take(), result) {
            let _ = sender.send(result);
        }
    }
}

impl<V> Default for Entry<V> {
    fn default() -> Self {
        Entry {
            state: Mutex::new(EntryState {
                is_fetching: false,
                promise: None,
            }),
        }
    }
}

impl<V> Entry<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, EntryState<V>> {
        // The state stays consistent across a panic, every write is a single assignment.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a fetch is currently in flight for this entry.
    pub fn is_fetching(&self) -> bool {
        self.lock().is_fetching
    }

    /// Whether the entry holds a promise callers can be served from.
    pub fn has_promise(&self) -> bool {
        self.lock().promise.is_some()
    }

    /// Serve a caller, reserving a fetch when one is needed.
    ///
    /// - No promise: a cold promise is stored and returned with a
    ///   [`Reservation`]. Concurrent first-time callers share that promise,
    ///   which resolves when the reservation settles.
    /// - Promise present, nothing in flight: the stored promise is returned
    ///   with a refresh [`Reservation`].
    /// - Fetch in flight: the stored promise is returned alone.
    ///
    /// `key` labels the error of a cold fetch that ends without a result.
    pub(crate) fn acquire(
        self: &Arc<Self>,
        key: &str,
    ) -> (Pending<V>, Lookup, Option<Reservation<V>>) {
        let mut state = self.lock();

        let stored = match &state.promise {
            Some(promise) => promise.clone(),
            None => {
                let (sender, receiver) = oneshot::channel();
                let key = key.to_string();
                let promise = receiver
                    .map(move |outcome| {
                        outcome.unwrap_or_else(|_| {
                            Err(CacheError::Aborted {
                                key,
                                message: "fetch ended without a result".to_string(),
                            })
                        })
                    })
                    .boxed()
                    .shared();

                state.promise = Some(promise.clone());
                state.is_fetching = true;
                let reservation = self.reserve(FetchKind::Cold, Some(sender));
                return (promise, Lookup::Miss, Some(reservation));
            }
        };

        if state.is_fetching {
            return (stored, Lookup::Joined, None);
        }

        state.is_fetching = true;
        (stored, Lookup::Stale, Some(self.reserve(FetchKind::Refresh, None)))
    }

    fn reserve(
        self: &Arc<Self>,
        kind: FetchKind,
        sender: Option<oneshot::Sender<Result<V, CacheError>>>,
    ) -> Reservation<V> {
        Reservation {
            entry: Arc::clone(self),
            kind,
            sender,
            result: None,
        }
    }

    /// Record the end of a fetch.
    ///
    /// `result` is `None` when the fetch never produced a result. The
    /// fetching flag is always cleared.
    fn settle(&self, kind: FetchKind, result: Option<&Result<V, CacheError>>) {
        let mut state = self.lock();
        state.is_fetching = false;

        match (kind, result) {
            (_, Some(Ok(value))) => state.promise = Some(resolved(value.clone())),
            // Keep serving the stale value.
            (FetchKind::Refresh, _) => {}
            // Nothing good to serve: let the next caller fetch cold again.
            (FetchKind::Cold, _) => state.promise = None,
        }
    }
}
