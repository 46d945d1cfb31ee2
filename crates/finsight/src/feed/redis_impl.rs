//! Redis pub/sub change feed.
//!
//! Each resource has its own channel (`channel:feed:{resource}`) carrying
//! JSON-encoded [`ChangeEvent`]s. One connection subscribes to every
//! channel it was opened for.

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::broadcast;

use finsight_core::feed::{feed_channel, ChangeEvent, ChangeFeed, FeedError, Result};

use super::memory::DEFAULT_CHANNEL_CAPACITY;

/// Maps Redis errors to FeedError.
fn map_redis_error(err: redis::RedisError) -> FeedError {
    if err.is_connection_refusal() || err.is_timeout() || err.is_connection_dropped() {
        FeedError::ConnectionFailed(err.to_string())
    } else {
        FeedError::PublishFailed(err.to_string())
    }
}

/// Redis-backed change feed for multi-process deployments.
pub struct RedisFeed {
    client: redis::Client,
    capacity: usize,
}

impl RedisFeed {
    /// Creates a new Redis change feed.
    ///
    /// # Arguments
    ///
    /// * `url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `capacity` - Events buffered per connection before it lags
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ConnectionFailed` if the server cannot be reached.
    pub async fn new(url: &str, capacity: usize) -> Result<Self> {
        let client =
            redis::Client::open(url).map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        // Verify connection by getting a connection
        let _ = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            client,
            capacity: capacity.max(1),
        })
    }

    /// Creates a feed with the default per-connection buffer.
    pub async fn with_default_capacity(url: &str) -> Result<Self> {
        Self::new(url, DEFAULT_CHANNEL_CAPACITY).await
    }
}

#[async_trait]
impl ChangeFeed for RedisFeed {
    async fn connect(&self, resources: &[String]) -> Result<broadcast::Receiver<ChangeEvent>> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;

        for resource in resources {
            pubsub
                .subscribe(feed_channel(resource))
                .await
                .map_err(|e| FeedError::ConnectionFailed(e.to_string()))?;
        }

        let (tx, rx) = broadcast::channel(self.capacity);
        let resources = resources.to_vec();

        tokio::spawn(async move {
            let mut stream = pubsub.into_on_message();

            loop {
                let msg = tokio::select! {
                    msg = stream.next() => match msg {
                        Some(msg) => msg,
                        None => break,
                    },
                    // The bridge dropped its receiver; release the subscription.
                    _ = tx.closed() => {
                        tracing::debug!(?resources, "Redis feed receiver closed");
                        break;
                    }
                };

                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(error = %e, "Unreadable Redis feed payload");
                        continue;
                    }
                };

                match serde_json::from_str::<ChangeEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            payload = %payload,
                            "Failed to deserialize change event"
                        );
                    }
                }
            }

            // Dropping the stream unsubscribes; dropping `tx` closes any
            // remaining receiver so the bridge reconnects.
            drop(stream);
            tracing::info!(?resources, "Redis feed subscription ended");
        });

        Ok(rx)
    }

    async fn publish(&self, event: &ChangeEvent) -> Result<()> {
        let channel = feed_channel(&event.resource);

        let payload =
            serde_json::to_string(event).map_err(|e| FeedError::Serialization(e.to_string()))?;

        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_error)?;

        conn.publish::<_, _, ()>(&channel, &payload)
            .await
            .map_err(|e| FeedError::PublishFailed(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    /// Helper to get Redis URL from environment.
    fn redis_url() -> String {
        std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    /// Skip test if Redis not available.
    async fn get_test_feed() -> Option<RedisFeed> {
        RedisFeed::with_default_capacity(&redis_url()).await.ok()
    }

    #[tokio::test]
    async fn test_redis_feed_publish_and_receive() {
        let Some(feed) = get_test_feed().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let resource = format!("expenses-{}", uuid::Uuid::new_v4());
        let mut rx = feed.connect(&[resource.clone()]).await.unwrap();

        feed.publish(&ChangeEvent::created(resource.clone()))
            .await
            .unwrap();

        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await;
        match received {
            Ok(Ok(event)) => assert_eq!(event, ChangeEvent::created(resource)),
            Ok(Err(e)) => panic!("Receive error: {:?}", e),
            Err(_) => panic!("Timeout waiting for event"),
        }
    }

    #[tokio::test]
    async fn test_redis_feed_ignores_other_channels() {
        let Some(feed) = get_test_feed().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let watched = format!("expenses-{}", uuid::Uuid::new_v4());
        let other = format!("stocks-{}", uuid::Uuid::new_v4());
        let mut rx = feed.connect(&[watched]).await.unwrap();

        feed.publish(&ChangeEvent::updated(other)).await.unwrap();

        let received = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(received.is_err(), "Should not receive event for other resource");
    }

    #[tokio::test]
    async fn test_redis_feed_releases_subscription_when_receiver_dropped() {
        let Some(feed) = get_test_feed().await else {
            eprintln!("Skipping test: Redis not available");
            return;
        };

        let resource = format!("expenses-{}", uuid::Uuid::new_v4());
        let channel = feed_channel(&resource);
        let mut conn = feed.client.get_multiplexed_async_connection().await.unwrap();

        let rx = feed.connect(&[resource]).await.unwrap();
        let (_, subscribers): (String, i64) = redis::cmd("PUBSUB")
            .arg("NUMSUB")
            .arg(&channel)
            .query_async(&mut conn)
            .await
            .unwrap();
        assert_eq!(subscribers, 1);

        // No traffic on the channel: the subscription must still go away.
        drop(rx);
        let released = async {
            loop {
                let (_, subscribers): (String, i64) = redis::cmd("PUBSUB")
                    .arg("NUMSUB")
                    .arg(&channel)
                    .query_async(&mut conn)
                    .await
                    .unwrap();
                if subscribers == 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(2), released)
            .await
            .expect("subscription was not released");
    }
}
