//! In-memory change feed.
//!
//! Delivers change events between tasks of one process using a tokio
//! broadcast channel. Also lets tests simulate transport loss.

use std::sync::{
    atomic::{AtomicU32, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use tokio::sync::{broadcast, RwLock};

use finsight_core::feed::{ChangeEvent, ChangeFeed, FeedError, Result};

/// Default number of events buffered per connection.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 100;

/// In-memory change feed.
///
/// Every connection shares one broadcast channel; the bridge filters by
/// resource.
#[derive(Debug, Clone)]
pub struct MemoryFeed {
    sender: Arc<RwLock<broadcast::Sender<ChangeEvent>>>,
    capacity: usize,
    failing_connects: Arc<AtomicU32>,
    total_connects: Arc<AtomicU64>,
}

impl MemoryFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a feed whose connections buffer `capacity` events before
    /// lagging. A zero capacity is raised to 1.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(RwLock::new(sender)),
            capacity,
            failing_connects: Arc::new(AtomicU32::new(0)),
            total_connects: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of receivers currently attached to the feed.
    pub async fn active_connections(&self) -> usize {
        self.sender.read().await.receiver_count()
    }

    /// Number of successful `connect` calls since creation.
    pub fn total_connects(&self) -> u64 {
        self.total_connects.load(Ordering::SeqCst)
    }

    /// Severs every open connection. Receivers observe `Closed`.
    pub async fn drop_connections(&self) {
        let (sender, _) = broadcast::channel(self.capacity);
        let previous = std::mem::replace(&mut *self.sender.write().await, sender);
        tracing::debug!(
            severed = previous.receiver_count(),
            "Dropping in-memory feed connections"
        );
    }

    /// Makes the next `count` connection attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    fn take_failure(&self) -> bool {
        self.failing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for MemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn connect(&self, resources: &[String]) -> Result<broadcast::Receiver<ChangeEvent>> {
        if self.take_failure() {
            return Err(FeedError::ConnectionFailed(
                "in-memory feed refused the connection".to_string(),
            ));
        }

        let receiver = self.sender.read().await.subscribe();
        self.total_connects.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(?resources, "In-memory feed connected");
        Ok(receiver)
    }

    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        // No receivers just means nobody is watching.
        let _ = self.sender.read().await.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    fn resources() -> Vec<String> {
        vec!["expenses".to_string()]
    }

    #[tokio::test]
    async fn test_publish_and_receive() {
        let feed = MemoryFeed::new();
        let mut receiver = feed.connect(&resources()).await.unwrap();

        feed.publish(&ChangeEvent::created("expenses")).await.unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received, ChangeEvent::created("expenses"));
    }

    #[tokio::test]
    async fn test_multiple_connections_receive_the_same_event() {
        let feed = MemoryFeed::new();
        let mut first = feed.connect(&resources()).await.unwrap();
        let mut second = feed.connect(&resources()).await.unwrap();

        feed.publish(&ChangeEvent::deleted("expenses")).await.unwrap();

        assert_eq!(first.recv().await.unwrap(), ChangeEvent::deleted("expenses"));
        assert_eq!(second.recv().await.unwrap(), ChangeEvent::deleted("expenses"));
    }

    #[tokio::test]
    async fn test_publish_without_connections() {
        let feed = MemoryFeed::new();
        let result = feed.publish(&ChangeEvent::updated("stocks")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_active_connections_tracks_receivers() {
        let feed = MemoryFeed::new();
        assert_eq!(feed.active_connections().await, 0);

        let receiver = feed.connect(&resources()).await.unwrap();
        assert_eq!(feed.active_connections().await, 1);

        drop(receiver);
        assert_eq!(feed.active_connections().await, 0);
        assert_eq!(feed.total_connects(), 1);
    }

    #[tokio::test]
    async fn test_drop_connections_closes_receivers() {
        let feed = MemoryFeed::new();
        let mut receiver = feed.connect(&resources()).await.unwrap();

        feed.drop_connections().await;

        assert_eq!(receiver.recv().await, Err(RecvError::Closed));
        assert_eq!(feed.active_connections().await, 0);
    }

    #[tokio::test]
    async fn test_fail_next_connects() {
        let feed = MemoryFeed::new();
        feed.fail_next_connects(2);

        assert!(matches!(
            feed.connect(&resources()).await,
            Err(FeedError::ConnectionFailed(_))
        ));
        assert!(feed.connect(&resources()).await.is_err());
        assert!(feed.connect(&resources()).await.is_ok());
        assert_eq!(feed.total_connects(), 1);
    }

    #[tokio::test]
    async fn test_small_capacity_lags() {
        let feed = MemoryFeed::with_capacity(1);
        let mut receiver = feed.connect(&resources()).await.unwrap();

        feed.publish(&ChangeEvent::created("expenses")).await.unwrap();
        feed.publish(&ChangeEvent::updated("expenses")).await.unwrap();

        assert_eq!(receiver.recv().await, Err(RecvError::Lagged(1)));
        assert_eq!(receiver.recv().await.unwrap(), ChangeEvent::updated("expenses"));
    }
}
