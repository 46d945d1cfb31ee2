//! Owns the change-feed connection of one mounted view and turns bursts of
//! change events into a single round of cache invalidations.

use std::{
    collections::BTreeSet,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::Instant,
};

use finsight_core::{
    cache::KeyMatcher,
    feed::{ChangeEvent, InvalidationMap},
    lifecycle::{transition, Generation, LifecycleEvent, SubscriptionState},
};

use crate::{
    cache::CacheStore,
    error::Result,
    feed::{ChangeFeedBridge, Connection, FeedHealth},
};

/// Generation value meaning "nothing mounted".
const UNMOUNTED: u64 = 0;

/// Snapshot of a manager's subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleStatus {
    pub state: SubscriptionState,
    pub generation: Generation,
    pub identity: Option<String>,
    /// The feed could not be opened or was lost. Aggregates still load but
    /// no longer refresh on their own.
    pub degraded: bool,
}

struct Slot {
    state: SubscriptionState,
    generation: Generation,
    identity: Option<String>,
    connection: Option<Connection>,
    debouncer: Option<JoinHandle<()>>,
    open_failed: bool,
}

impl Slot {
    fn new() -> Self {
        Self {
            state: SubscriptionState::Unsubscribed,
            generation: Generation::default(),
            identity: None,
            connection: None,
            debouncer: None,
            open_failed: false,
        }
    }
}

/// Keeps exactly one feed connection per mounted view identity.
pub struct SubscriptionManager<V> {
    store: CacheStore<V>,
    bridge: ChangeFeedBridge,
    routes: Arc<InvalidationMap>,
    debounce: Duration,
    live_generation: Arc<AtomicU64>,
    slot: Mutex<Slot>,
}

impl<V> SubscriptionManager<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new(
        store: CacheStore<V>,
        bridge: ChangeFeedBridge,
        routes: InvalidationMap,
        debounce: Duration,
    ) -> Self {
        Self {
            store,
            bridge,
            routes: Arc::new(routes),
            debounce,
            live_generation: Arc::new(AtomicU64::new(UNMOUNTED)),
            slot: Mutex::new(Slot::new()),
        }
    }

    pub fn routes(&self) -> &InvalidationMap {
        &self.routes
    }

    /// Subscribes to every routed resource on behalf of `identity`.
    ///
    /// Any previous connection is closed and awaited before the new one is
    /// opened, so events from an old mount are never processed after this
    /// returns.
    ///
    /// # Errors
    ///
    /// Returns the feed error when the connection cannot be opened. The
    /// manager is then `Unsubscribed` and reports itself degraded.
    pub async fn mount(&self, identity: impl Into<String>) -> Result<Generation> {
        let identity = identity.into();
        let mut slot = self.slot.lock().await;

        self.teardown(&mut slot).await?;

        slot.state = transition(slot.state, LifecycleEvent::Mount)?;
        slot.generation = slot.generation.next();
        slot.identity = Some(identity.clone());
        let generation = slot.generation;
        self.live_generation.store(generation.0, Ordering::SeqCst);
        tracing::debug!(%identity, %generation, "Mounting subscription");

        let (tx, rx) = mpsc::unbounded_channel::<String>();
        let live_generation = Arc::clone(&self.live_generation);
        let on_event = move |event: ChangeEvent| {
            if live_generation.load(Ordering::SeqCst) != generation.0 {
                tracing::trace!(%generation, resource = %event.resource, "Dropping stale event");
                return;
            }
            let _ = tx.send(event.resource);
        };

        let resources = self.routes.resources();
        let connection = match self.bridge.open(&resources, on_event).await {
            Ok(connection) => connection,
            Err(e) => {
                slot.state = transition(slot.state, LifecycleEvent::OpenFailed)?;
                slot.open_failed = true;
                self.live_generation.store(UNMOUNTED, Ordering::SeqCst);
                tracing::warn!(%identity, %generation, error = %e, "Subscription unavailable, aggregates will not auto-refresh");
                return Err(e.into());
            }
        };

        let debouncer = Debouncer {
            generation,
            live_generation: Arc::clone(&self.live_generation),
            routes: Arc::clone(&self.routes),
            store: self.store.clone(),
            window: self.debounce,
        };

        slot.state = transition(slot.state, LifecycleEvent::Opened)?;
        slot.connection = Some(connection);
        slot.debouncer = Some(tokio::spawn(debouncer.run(rx)));
        slot.open_failed = false;
        tracing::info!(%identity, %generation, ?resources, "Subscription active");

        Ok(generation)
    }

    /// Closes the current subscription. Calling it again is a no-op.
    pub async fn unmount(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        let was = slot.state;
        self.teardown(&mut slot).await?;
        slot.identity = None;
        if was != SubscriptionState::Unsubscribed {
            tracing::debug!(generation = %slot.generation, "Unmounted subscription");
        }
        Ok(())
    }

    pub async fn status(&self) -> LifecycleStatus {
        let slot = self.slot.lock().await;
        let lost = slot
            .connection
            .as_ref()
            .is_some_and(|connection| connection.current_health() == FeedHealth::ConnectionLost);

        LifecycleStatus {
            state: slot.state,
            generation: slot.generation,
            identity: slot.identity.clone(),
            degraded: slot.open_failed || lost,
        }
    }

    /// Health of the live connection, if any.
    pub async fn feed_health(&self) -> Option<FeedHealth> {
        let slot = self.slot.lock().await;
        slot.connection.as_ref().map(Connection::current_health)
    }

    async fn teardown(&self, slot: &mut Slot) -> Result<()> {
        self.live_generation.store(UNMOUNTED, Ordering::SeqCst);

        if let Some(debouncer) = slot.debouncer.take() {
            debouncer.abort();
        }
        if let Some(connection) = slot.connection.take() {
            connection.close().await;
        }

        slot.state = transition(slot.state, LifecycleEvent::Unmount)?;
        Ok(())
    }
}

impl<V> Drop for SubscriptionManager<V> {
    fn drop(&mut self) {
        self.live_generation.store(UNMOUNTED, Ordering::SeqCst);
        if let Some(debouncer) = self.slot.get_mut().debouncer.take() {
            debouncer.abort();
        }
    }
}

/// Collects changed resources over a fixed window, then invalidates once.
struct Debouncer<V> {
    generation: Generation,
    live_generation: Arc<AtomicU64>,
    routes: Arc<InvalidationMap>,
    store: CacheStore<V>,
    window: Duration,
}

impl<V> Debouncer<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn run(self, mut rx: mpsc::UnboundedReceiver<String>) {
        while let Some(first) = rx.recv().await {
            let deadline = Instant::now() + self.window;
            let mut burst = BTreeSet::from([first]);

            // The window starts at the first event; later events do not extend it.
            while let Ok(Some(resource)) = tokio::time::timeout_at(deadline, rx.recv()).await {
                burst.insert(resource);
            }

            if !self.flush(&burst) {
                return;
            }
        }
    }

    /// Returns false once this debouncer's mount is gone.
    fn flush(&self, burst: &BTreeSet<String>) -> bool {
        if self.live_generation.load(Ordering::SeqCst) != self.generation.0 {
            tracing::trace!(generation = %self.generation, "Dropping stale debounce flush");
            return false;
        }

        let prefixes = self.routes.coalesce(burst.iter().map(String::as_str));
        let invalidated: usize = prefixes
            .iter()
            .map(|prefix| self.store.invalidate(KeyMatcher::prefix(prefix.as_str())))
            .sum();

        tracing::debug!(
            generation = %self.generation,
            resources = ?burst,
            invalidated,
            "Flushed change burst"
        );
        true
    }
}
