//! The application object tying the cache, the feed and the views together.
//!
//! One `Dashboard` is built at startup and passed around by `Clone`; there
//! is no global state.

use std::sync::Arc;

use rust_decimal::Decimal;

use finsight_core::{
    aggregate::{Granularity, PeriodAggregate},
    feed::{ChangeFeed, InvalidationMap},
    lifecycle::Generation,
    source::RecordSource,
};

use crate::{
    binding::{AggregateBinding, BoundAggregate, Clock},
    cache::CacheStore,
    config::Config,
    error::Result,
    feed::ChangeFeedBridge,
    lifecycle::{LifecycleStatus, SubscriptionManager},
};

/// Shared dashboard state.
#[derive(Clone)]
pub struct Dashboard {
    /// Aggregate cache shared by every view.
    store: CacheStore<PeriodAggregate>,
    /// Change-feed bridge over the configured transport.
    bridge: ChangeFeedBridge,
    /// Owner of the single feed subscription.
    manager: Arc<SubscriptionManager<PeriodAggregate>>,
    /// Factory for bound aggregate views.
    binding: AggregateBinding,
}

impl Dashboard {
    /// Builds a dashboard watching every resource in `routes`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` when `config` does not validate.
    pub fn new(
        config: &Config,
        transport: Arc<dyn ChangeFeed>,
        source: Arc<dyn RecordSource>,
        clock: Arc<dyn Clock>,
        routes: InvalidationMap,
    ) -> Result<Self> {
        config.validate()?;

        let store = CacheStore::new();
        let bridge = ChangeFeedBridge::new(transport, config.reconnect_policy());
        let manager = SubscriptionManager::new(
            store.clone(),
            bridge.clone(),
            routes,
            config.debounce(),
        );
        let binding = AggregateBinding::new(store.clone(), source, clock);

        tracing::debug!(
            debounce_ms = config.debounce_ms,
            resources = ?manager.routes().resources(),
            "Dashboard created"
        );

        Ok(Self {
            store,
            bridge,
            manager: Arc::new(manager),
            binding,
        })
    }

    /// Starts live updates on behalf of `identity`.
    pub async fn mount(&self, identity: impl Into<String>) -> Result<Generation> {
        self.manager.mount(identity).await
    }

    /// Stops live updates. Idempotent.
    pub async fn unmount(&self) -> Result<()> {
        self.manager.unmount().await
    }

    /// Binds a live view of one aggregate.
    pub fn aggregate(&self, resource_key: &str, granularity: Granularity) -> BoundAggregate {
        self.binding.use_aggregate(resource_key, granularity)
    }

    /// Fetches one aggregate through the cache.
    pub async fn load(
        &self,
        resource_key: &str,
        granularity: Granularity,
    ) -> Result<PeriodAggregate> {
        Ok(self.binding.load(resource_key, granularity).await?)
    }

    /// Global balance across `resource_keys`.
    ///
    /// Sums each resource's all-time balance as carried by its cached
    /// aggregate, so it follows the same invalidations as the cards.
    pub async fn balance(&self, resource_keys: &[&str], granularity: Granularity) -> Result<Decimal> {
        let mut balance = Decimal::ZERO;
        for resource_key in resource_keys {
            let aggregate = self.load(resource_key, granularity).await?;
            balance = balance.saturating_add(aggregate.balance);
        }
        Ok(balance)
    }

    pub async fn status(&self) -> LifecycleStatus {
        self.manager.status().await
    }

    pub fn store(&self) -> &CacheStore<PeriodAggregate> {
        &self.store
    }

    pub fn bridge(&self) -> &ChangeFeedBridge {
        &self.bridge
    }

    /// Unmounts and empties the cache.
    pub async fn shutdown(&self) -> Result<()> {
        self.manager.unmount().await?;
        let stats = self.store.stats();
        self.store.clear();
        tracing::info!(
            hits = stats.hits,
            misses = stats.misses,
            loads = stats.loads,
            load_failures = stats.load_failures,
            "Dashboard shut down"
        );
        Ok(())
    }
}
