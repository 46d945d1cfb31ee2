//! Derived aggregate views bound to the cache.
//!
//! A bound view reads its aggregate from the [`CacheStore`], loads it through
//! the [`RecordSource`] on a miss, and publishes a new view value whenever
//! the cache entry is refreshed.

use std::{
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use chrono::NaiveDate;
use serde::Serialize;
use tokio::sync::watch;

use finsight_core::{
    aggregate::{aggregate, current_period, Granularity, PeriodAggregate},
    cache::{aggregate_key, CacheError, KeyMatcher},
    source::RecordSource,
};

use crate::cache::{CacheStore, EntryStatus, LoadFuture, Subscription};

/// Source of "today" for period computations.
pub trait Clock: Send + Sync {
    fn today(&self) -> NaiveDate;
}

/// The local calendar date.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct FixedClock {
    date: Arc<Mutex<NaiveDate>>,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date: Arc::new(Mutex::new(date)),
        }
    }

    pub fn set(&self, date: NaiveDate) {
        *self.date.lock().unwrap_or_else(PoisonError::into_inner) = date;
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        *self.date.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// What a bound view currently shows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "aggregate", rename_all = "snake_case")]
pub enum AggregateView {
    Loading,
    Ready(PeriodAggregate),
}

impl AggregateView {
    pub fn aggregate(&self) -> Option<&PeriodAggregate> {
        match self {
            AggregateView::Loading => None,
            AggregateView::Ready(aggregate) => Some(aggregate),
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, AggregateView::Loading)
    }
}

/// Creates aggregate views over one store and one record source.
#[derive(Clone)]
pub struct AggregateBinding {
    store: CacheStore<PeriodAggregate>,
    source: Arc<dyn RecordSource>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for AggregateBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateBinding")
            .field("store", &self.store)
            .field("today", &self.clock.today())
            .finish_non_exhaustive()
    }
}

impl AggregateBinding {
    pub fn new(
        store: CacheStore<PeriodAggregate>,
        source: Arc<dyn RecordSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
        }
    }

    pub fn store(&self) -> &CacheStore<PeriodAggregate> {
        &self.store
    }

    /// Fetches one aggregate through the cache without binding a view.
    ///
    /// A cached aggregate from an earlier period is recomputed.
    pub async fn load(
        &self,
        resource_key: &str,
        granularity: Granularity,
    ) -> Result<PeriodAggregate, CacheError> {
        let key = aggregate_key(resource_key, granularity);
        expire_if_rolled_over(&self.store, &key, granularity, self.clock.today());
        self.store
            .fetch_or_load(&key, self.loader(resource_key, granularity))
            .await
    }

    /// Binds a live view of the aggregate for `resource_key`.
    ///
    /// A fresh cached aggregate for the current period is shown immediately;
    /// otherwise the view starts `Loading` while a load runs in the
    /// background. Must be called within a Tokio runtime.
    pub fn use_aggregate(&self, resource_key: &str, granularity: Granularity) -> BoundAggregate {
        let key = aggregate_key(resource_key, granularity);
        expire_if_rolled_over(&self.store, &key, granularity, self.clock.today());

        let cached = self
            .store
            .get(&key)
            .filter(|snapshot| snapshot.status == EntryStatus::Fresh)
            .and_then(|snapshot| snapshot.value);
        let needs_load = cached.is_none();
        let initial = cached.map_or(AggregateView::Loading, AggregateView::Ready);

        let (tx, rx) = watch::channel(initial);
        let view = Arc::new(tx);
        let last_error = Arc::new(Mutex::new(None));

        let on_refresh = {
            let view = Arc::clone(&view);
            move |aggregate: &PeriodAggregate| publish(&view, AggregateView::Ready(aggregate.clone()))
        };
        let subscription = self.store.subscribe(&key, on_refresh);

        if needs_load {
            tracing::trace!(key = %key, "Aggregate not cached, loading");
            let store = self.store.clone();
            let loader = self.loader(resource_key, granularity);
            let view = Arc::clone(&view);
            let last_error = Arc::clone(&last_error);
            let key = key.clone();

            // Refreshes reach the view through the subscription, which may
            // already hold something newer than this result.
            tokio::spawn(async move {
                match store.fetch_or_load(&key, loader).await {
                    Ok(aggregate) => publish_initial(&view, AggregateView::Ready(aggregate)),
                    Err(error) => {
                        tracing::warn!(key = %key, %error, "Aggregate load failed");
                        *last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(error);
                        match store.get_value(&key) {
                            Some(stale) => publish_initial(&view, AggregateView::Ready(stale)),
                            // Wake watchers so they can read the error.
                            None => {
                                view.send_modify(|_| {});
                            }
                        }
                    }
                }
            });
        }

        BoundAggregate {
            key,
            granularity,
            view: rx,
            last_error,
            store: self.store.clone(),
            clock: Arc::clone(&self.clock),
            _subscription: subscription,
        }
    }

    fn loader(
        &self,
        resource_key: &str,
        granularity: Granularity,
    ) -> impl Fn() -> LoadFuture<PeriodAggregate> + Send + Sync + 'static {
        let source = Arc::clone(&self.source);
        let clock = Arc::clone(&self.clock);
        let resource_key = resource_key.to_string();

        move || -> LoadFuture<PeriodAggregate> {
            let source = Arc::clone(&source);
            let clock = Arc::clone(&clock);
            let resource_key = resource_key.clone();
            Box::pin(async move {
                let records = source
                    .load_records(&resource_key)
                    .await
                    .map_err(|e| CacheError::LoadFailed(e.to_string()))?;
                Ok::<_, CacheError>(aggregate(&records, granularity, clock.today()))
            })
        }
    }
}

fn publish(view: &watch::Sender<AggregateView>, next: AggregateView) {
    view.send_if_modified(|current| {
        if *current == next {
            return false;
        }
        *current = next;
        true
    });
}

/// Like [`publish`], but only while the view is still `Loading`.
fn publish_initial(view: &watch::Sender<AggregateView>, next: AggregateView) {
    view.send_if_modified(|current| {
        if !current.is_loading() {
            return false;
        }
        *current = next;
        true
    });
}

/// Invalidates the aggregate cached under `key` when it was computed for an
/// earlier period than `today`'s.
///
/// Returns true when the cached aggregate is outdated, whether a recompute
/// was started here or is already in flight.
fn expire_if_rolled_over(
    store: &CacheStore<PeriodAggregate>,
    key: &str,
    granularity: Granularity,
    today: NaiveDate,
) -> bool {
    let Some(snapshot) = store.get(key) else {
        return false;
    };
    let Some(aggregate) = snapshot.value else {
        return false;
    };
    if current_period(granularity, aggregate.as_of) == current_period(granularity, today) {
        return false;
    }
    if snapshot.status != EntryStatus::Pending {
        tracing::debug!(key, as_of = %aggregate.as_of, %today, "Period rolled over");
        store.invalidate(KeyMatcher::key(key));
    }
    true
}

/// A live aggregate view. Dropping it unsubscribes from the cache.
pub struct BoundAggregate {
    key: String,
    granularity: Granularity,
    view: watch::Receiver<AggregateView>,
    last_error: Arc<Mutex<Option<CacheError>>>,
    store: CacheStore<PeriodAggregate>,
    clock: Arc<dyn Clock>,
    _subscription: Subscription<PeriodAggregate>,
}

impl fmt::Debug for BoundAggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundAggregate")
            .field("key", &self.key)
            .field("view", &*self.view.borrow())
            .finish_non_exhaustive()
    }
}

impl BoundAggregate {
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The view as of now.
    ///
    /// When the clock has moved into a new period since the aggregate was
    /// computed, the cache entry is invalidated so a recompute follows.
    pub fn current(&self) -> AggregateView {
        let view = self.view.borrow().clone();
        if !view.is_loading() {
            self.refresh_on_rollover();
        }
        view
    }

    /// Waits for the next re-render and returns it.
    ///
    /// Returns `None` once the view can no longer change.
    pub async fn changed(&mut self) -> Option<AggregateView> {
        self.view.changed().await.ok()?;
        Some(self.view.borrow_and_update().clone())
    }

    /// Waits until the view holds an aggregate for the current period.
    pub async fn ready(&mut self) -> Option<PeriodAggregate> {
        let aggregate = self
            .view
            .wait_for(|view| !view.is_loading())
            .await
            .ok()?
            .aggregate()
            .cloned()?;
        if !self.refresh_on_rollover() {
            return Some(aggregate);
        }
        self.changed().await?.aggregate().cloned()
    }

    /// The most recent failed load for this view, if any.
    pub fn last_error(&self) -> Option<CacheError> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn refresh_on_rollover(&self) -> bool {
        expire_if_rolled_over(&self.store, &self.key, self.granularity, self.clock.today())
    }
}
