//! In-memory keyed query cache with single-flight loads.
//!
//! Each entry remembers the last loader used to fill it so invalidation can
//! refresh subscribed entries in the background. There is no TTL: an entry
//! only goes stale when something invalidates it, and only leaves the store
//! through [`CacheStore::evict`] or [`CacheStore::clear`].

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use serde::Serialize;
use tokio::sync::watch;

use finsight_core::cache::{CacheError, KeyMatcher, Result};

/// Boxed future returned by a stored loader.
pub type LoadFuture<V> = Pin<Box<dyn Future<Output = Result<V>> + Send>>;

type Loader<V> = Arc<dyn Fn() -> LoadFuture<V> + Send + Sync>;
type Callback<V> = Arc<dyn Fn(&V) + Send + Sync>;
type LoadOutcome<V> = Option<Result<V>>;

/// Freshness of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EntryStatus {
    /// Holds the latest known value.
    Fresh,
    /// Needs a reload; may still hold a previous value.
    Stale,
    /// A load is in flight.
    Pending,
}

/// Point-in-time view of one entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot<V> {
    pub key: String,
    pub value: Option<V>,
    pub status: EntryStatus,
    pub subscriber_count: usize,
}

/// Counters describing how the store has been used.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    pub load_failures: u64,
}

struct Entry<V> {
    value: Option<V>,
    status: EntryStatus,
    loader: Option<Loader<V>>,
    in_flight: Option<watch::Receiver<LoadOutcome<V>>>,
    /// Set when an invalidation lands while a load is in flight.
    reload_requested: bool,
    subscribers: HashMap<u64, Callback<V>>,
    /// Distinguishes this entry from a later one created under the same key.
    epoch: u64,
    /// Bumped on every successful load.
    version: u64,
    /// Highest version handed to subscribers. Held while callbacks run so
    /// an older value is never delivered after a newer one.
    delivered: Arc<Mutex<u64>>,
}

impl<V> Entry<V> {
    fn new(epoch: u64) -> Self {
        Self {
            value: None,
            status: EntryStatus::Stale,
            loader: None,
            in_flight: None,
            reload_requested: false,
            subscribers: HashMap::new(),
            epoch,
            version: 0,
            delivered: Arc::new(Mutex::new(0)),
        }
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    loads: AtomicU64,
    load_failures: AtomicU64,
}

struct Inner<V> {
    entries: Mutex<HashMap<String, Entry<V>>>,
    next_id: AtomicU64,
    counters: Counters,
}

impl<V> Inner<V> {
    /// The map is never left half-updated, so a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry<V>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

/// Keyed store of named query results.
///
/// Cloning is cheap and every clone shares the same entries.
pub struct CacheStore<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for CacheStore<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for CacheStore<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.inner.lock().len())
            .finish()
    }
}

impl<V> Default for CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                entries: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                counters: Counters::default(),
            }),
        }
    }

    /// Returns a snapshot of the entry for `key`, if one exists.
    pub fn get(&self, key: &str) -> Option<EntrySnapshot<V>> {
        let entries = self.inner.lock();
        entries.get(key).map(|entry| EntrySnapshot {
            key: key.to_string(),
            value: entry.value.clone(),
            status: entry.status,
            subscriber_count: entry.subscribers.len(),
        })
    }

    /// Returns the last known value for `key`, fresh or not.
    pub fn get_value(&self, key: &str) -> Option<V> {
        self.inner.lock().get(key).and_then(|entry| entry.value.clone())
    }

    /// Returns the cached value if fresh, otherwise loads it.
    ///
    /// Concurrent calls for a key that is already loading share that load.
    /// `loader` becomes the entry's loader for later background refreshes.
    /// A failed load is reported to the callers sharing it while the entry
    /// keeps its previous value.
    pub async fn fetch_or_load<F, Fut>(&self, key: &str, loader: F) -> Result<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
    {
        let loader: Loader<V> = Arc::new(move || -> LoadFuture<V> { Box::pin(loader()) });

        let in_flight = {
            let mut entries = self.inner.lock();
            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(self.inner.next_id()));
            entry.loader = Some(Arc::clone(&loader));

            if entry.status == EntryStatus::Fresh {
                if let Some(value) = &entry.value {
                    self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key, "Cache hit");
                    return Ok(value.clone());
                }
            }

            // A closed channel means the previous load died; start over.
            let joinable = entry
                .in_flight
                .as_ref()
                .filter(|rx| entry.status == EntryStatus::Pending && rx.has_changed().is_ok())
                .cloned();

            match joinable {
                Some(rx) => {
                    tracing::trace!(key, "Joining in-flight load");
                    rx
                }
                None => {
                    self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                    tracing::trace!(key, "Cache miss");
                    self.start_load(key, entry, loader)
                        .ok_or(CacheError::LoadAbandoned)?
                }
            }
        };

        wait_for_outcome(in_flight).await
    }

    /// Marks every entry selected by `matcher` stale and returns how many matched.
    ///
    /// Subscribed entries reload in the background with their last loader.
    /// Unsubscribed entries only become stale and reload on their next fetch.
    /// An entry that is mid-load is reloaded once more after that load lands.
    pub fn invalidate(&self, matcher: impl Into<KeyMatcher>) -> usize {
        let matcher = matcher.into();
        let mut entries = self.inner.lock();
        let mut matched = 0;

        for (key, entry) in entries.iter_mut().filter(|(key, _)| matcher.matches(key)) {
            matched += 1;

            if entry.status == EntryStatus::Pending {
                // A closed channel means the load task died and nothing will
                // act on `reload_requested`; reload now instead.
                let alive = entry
                    .in_flight
                    .as_ref()
                    .is_some_and(|rx| rx.has_changed().is_ok());
                if alive {
                    entry.reload_requested = true;
                    continue;
                }
                tracing::debug!(key = %key, "Previous load died; reloading");
            }

            entry.status = EntryStatus::Stale;
            if entry.subscribers.is_empty() {
                continue;
            }
            if let Some(loader) = entry.loader.clone() {
                self.start_load(key, entry, loader);
            }
        }

        tracing::debug!(matcher = %matcher, matched, "Invalidated cache entries");
        matched
    }

    /// Registers `callback` to run whenever `key` receives a new fresh value.
    ///
    /// Creates an empty stale entry when the key is unknown.
    pub fn subscribe<F>(&self, key: &str, callback: F) -> Subscription<V>
    where
        F: Fn(&V) + Send + Sync + 'static,
    {
        let id = self.inner.next_id();
        let mut entries = self.inner.lock();
        entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(self.inner.next_id()))
            .subscribers
            .insert(id, Arc::new(callback));

        Subscription {
            store: Arc::downgrade(&self.inner),
            key: key.to_string(),
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Removes `key` from the store. Returns true if it existed.
    ///
    /// A load in flight for the key still resolves its waiters but does not
    /// bring the entry back.
    pub fn evict(&self, key: &str) -> bool {
        let removed = self.inner.lock().remove(key).is_some();
        if removed {
            tracing::debug!(key, "Evicted cache entry");
        }
        removed
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Keys currently stored, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().keys().cloned().collect()
    }

    pub fn stats(&self) -> CacheStats {
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            loads: counters.loads.load(Ordering::Relaxed),
            load_failures: counters.load_failures.load(Ordering::Relaxed),
        }
    }

    /// Spawns `loader` for `entry` and marks it pending.
    ///
    /// Must be called with the entries lock held. Returns `None` when there
    /// is no runtime to spawn on, leaving the entry stale.
    fn start_load(
        &self,
        key: &str,
        entry: &mut Entry<V>,
        loader: Loader<V>,
    ) -> Option<watch::Receiver<LoadOutcome<V>>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(key, "No async runtime available; leaving entry stale");
            return None;
        };

        let (tx, rx) = watch::channel(None);
        entry.status = EntryStatus::Pending;
        entry.in_flight = Some(rx.clone());
        entry.reload_requested = false;
        self.inner.counters.loads.fetch_add(1, Ordering::Relaxed);

        let store = self.clone();
        let key = key.to_string();
        let epoch = entry.epoch;
        runtime.spawn(async move {
            let outcome = loader().await;
            store.complete_load(&key, epoch, outcome, tx);
        });

        Some(rx)
    }

    /// Stores a finished load, wakes its waiters, then notifies subscribers.
    ///
    /// Subscribers are skipped when a newer value has already reached them.
    fn complete_load(
        &self,
        key: &str,
        epoch: u64,
        outcome: Result<V>,
        tx: watch::Sender<LoadOutcome<V>>,
    ) {
        let mut notify: Vec<Callback<V>> = Vec::new();
        let mut delivery = None;

        {
            let mut entries = self.inner.lock();
            match entries.get_mut(key) {
                Some(entry) if entry.epoch == epoch => {
                    entry.in_flight = None;
                    match &outcome {
                        Ok(value) => {
                            entry.value = Some(value.clone());
                            entry.status = EntryStatus::Fresh;
                            entry.version += 1;
                            delivery = Some((entry.version, Arc::clone(&entry.delivered)));
                            notify = entry.subscribers.values().cloned().collect();
                            tracing::trace!(key, "Cache entry refreshed");
                        }
                        Err(error) => {
                            entry.status = EntryStatus::Stale;
                            self.inner.counters.load_failures.fetch_add(1, Ordering::Relaxed);
                            tracing::warn!(key, %error, "Cache load failed; keeping previous value");
                        }
                    }

                    if std::mem::take(&mut entry.reload_requested) {
                        entry.status = EntryStatus::Stale;
                        if !entry.subscribers.is_empty() {
                            if let Some(loader) = entry.loader.clone() {
                                tracing::debug!(key, "Reloading entry invalidated mid-load");
                                self.start_load(key, entry, loader);
                            }
                        }
                    }
                }
                _ => {
                    tracing::trace!(key, "Load finished for an evicted entry");
                }
            }
        }

        // No receivers just means nobody was waiting on this load.
        let _ = tx.send(Some(outcome.clone()));

        let (Ok(value), Some((version, delivered))) = (&outcome, delivery) else {
            return;
        };
        let mut last_delivered = delivered.lock().unwrap_or_else(PoisonError::into_inner);
        if *last_delivered >= version {
            tracing::trace!(key, version, "Skipping superseded notification");
            return;
        }
        *last_delivered = version;
        for callback in notify {
            callback(value);
        }
    }
}

async fn wait_for_outcome<V: Clone>(mut rx: watch::Receiver<LoadOutcome<V>>) -> Result<V> {
    let outcome = match rx.wait_for(Option::is_some).await {
        Ok(outcome) => (*outcome).clone(),
        Err(_) => None,
    };
    outcome.unwrap_or(Err(CacheError::LoadAbandoned))
}

/// Handle for a subscriber callback.
///
/// Unsubscribing is idempotent, and dropping the handle unsubscribes.
pub struct Subscription<V> {
    store: Weak<Inner<V>>,
    key: String,
    id: u64,
    active: AtomicBool,
}

impl<V> Subscription<V> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        let Some(inner) = self.store.upgrade() else {
            return;
        };
        let mut entries = inner.lock();
        if let Some(entry) = entries.get_mut(&self.key) {
            entry.subscribers.remove(&self.id);
        }
    }
}

impl<V> fmt::Debug for Subscription<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

impl<V> Drop for Subscription<V> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
