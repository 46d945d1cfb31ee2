//! One logical connection to a change feed, with transparent reconnection.

use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use serde::Serialize;
use tokio::{
    sync::{broadcast, broadcast::error::RecvError, oneshot, watch},
    task::JoinHandle,
};

use finsight_core::feed::{ChangeEvent, ChangeFeed, EventKind, FeedError, Result};

use crate::config::ReconnectPolicy;

/// Observable state of a bridge connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FeedHealth {
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Reconnection retries are exhausted. No more events will arrive.
    ConnectionLost,
    Closed,
}

impl FeedHealth {
    /// True while the connection may still deliver events.
    pub fn is_live(&self) -> bool {
        matches!(
            self,
            FeedHealth::Connecting | FeedHealth::Connected | FeedHealth::Reconnecting { .. }
        )
    }
}

/// Opens filtered, self-healing connections on top of a [`ChangeFeed`].
#[derive(Clone)]
pub struct ChangeFeedBridge {
    transport: Arc<dyn ChangeFeed>,
    policy: ReconnectPolicy,
    next_id: Arc<AtomicU64>,
}

impl fmt::Debug for ChangeFeedBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeFeedBridge")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ChangeFeedBridge {
    pub fn new(transport: Arc<dyn ChangeFeed>, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            policy,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// The underlying transport, for publishing.
    pub fn transport(&self) -> &Arc<dyn ChangeFeed> {
        &self.transport
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Opens a connection delivering events for `resources` to `on_event`.
    ///
    /// Returns once the transport handshake completes. Failed handshakes are
    /// retried per the reconnect policy.
    ///
    /// # Errors
    ///
    /// Returns `FeedError::ConnectionLost` when every attempt failed.
    pub async fn open<F>(&self, resources: &[String], on_event: F) -> Result<Connection>
    where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (health_tx, health_rx) = watch::channel(FeedHealth::Connecting);

        let receiver = match self.transport.connect(resources).await {
            Ok(receiver) => receiver,
            Err(e) => {
                tracing::warn!(connection = id, error = %e, "Feed connection failed, retrying");
                match reconnect(self.transport.as_ref(), resources, &self.policy, &health_tx).await
                {
                    Some(receiver) => receiver,
                    None => {
                        health_tx.send_replace(FeedHealth::ConnectionLost);
                        tracing::error!(
                            connection = id,
                            attempts = self.policy.max_retries,
                            "Feed connection could not be established"
                        );
                        return Err(FeedError::ConnectionLost {
                            attempts: self.policy.max_retries,
                        });
                    }
                }
            }
        };

        health_tx.send_replace(FeedHealth::Connected);
        tracing::info!(connection = id, ?resources, "Feed connection open");

        let (cancel_tx, cancel_rx) = oneshot::channel();
        let pump = Pump {
            id,
            transport: Arc::clone(&self.transport),
            resources: resources.to_vec(),
            policy: self.policy,
            health: health_tx,
        };
        let task = tokio::spawn(pump.run(receiver, on_event, cancel_rx));

        Ok(Connection {
            id,
            resources: resources.to_vec(),
            health: health_rx,
            cancel: Some(cancel_tx),
            task: Some(task),
        })
    }
}

/// Handle to an open bridge connection.
///
/// Dropping the handle stops event delivery; [`Connection::close`] also
/// waits for the connection to be released.
pub struct Connection {
    id: u64,
    resources: Vec<String>,
    health: watch::Receiver<FeedHealth>,
    cancel: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("resources", &self.resources)
            .field("health", &*self.health.borrow())
            .finish()
    }
}

impl Connection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn resources(&self) -> &[String] {
        &self.resources
    }

    /// A receiver tracking this connection's health.
    pub fn health(&self) -> watch::Receiver<FeedHealth> {
        self.health.clone()
    }

    pub fn current_health(&self) -> FeedHealth {
        *self.health.borrow()
    }

    /// Tears the connection down and waits until the transport receiver has
    /// been released.
    pub async fn close(mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(connection = self.id, error = %e, "Feed pump ended abnormally");
            }
        }
        tracing::info!(connection = self.id, "Feed connection closed");
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}

/// Background task moving events from the transport to the callback.
struct Pump {
    id: u64,
    transport: Arc<dyn ChangeFeed>,
    resources: Vec<String>,
    policy: ReconnectPolicy,
    health: watch::Sender<FeedHealth>,
}

impl Pump {
    async fn run<F>(
        self,
        mut receiver: broadcast::Receiver<ChangeEvent>,
        on_event: F,
        mut cancel: oneshot::Receiver<()>,
    ) where
        F: Fn(ChangeEvent) + Send + Sync + 'static,
    {
        loop {
            let received = tokio::select! {
                _ = &mut cancel => break,
                received = receiver.recv() => received,
            };

            match received {
                Ok(event) => {
                    if self.resources.contains(&event.resource) {
                        tracing::trace!(
                            connection = self.id,
                            resource = %event.resource,
                            kind = %event.kind,
                            "Feed event"
                        );
                        on_event(event);
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        connection = self.id,
                        skipped,
                        "Feed receiver lagged, marking every resource changed"
                    );
                    for resource in &self.resources {
                        on_event(ChangeEvent::new(resource.clone(), EventKind::Unknown));
                    }
                }
                Err(RecvError::Closed) => {
                    tracing::warn!(connection = self.id, "Feed transport closed, reconnecting");
                    let reconnected = tokio::select! {
                        _ = &mut cancel => break,
                        reconnected = reconnect(
                            self.transport.as_ref(),
                            &self.resources,
                            &self.policy,
                            &self.health,
                        ) => reconnected,
                    };

                    match reconnected {
                        Some(next) => {
                            receiver = next;
                            self.health.send_replace(FeedHealth::Connected);
                            tracing::info!(connection = self.id, "Feed connection restored");
                        }
                        None => {
                            self.health.send_replace(FeedHealth::ConnectionLost);
                            tracing::error!(
                                connection = self.id,
                                attempts = self.policy.max_retries,
                                "Feed connection lost, giving up"
                            );
                            return;
                        }
                    }
                }
            }
        }

        self.health.send_replace(FeedHealth::Closed);
    }
}

/// Retries `connect` with exponential backoff. `None` once retries run out.
async fn reconnect(
    transport: &dyn ChangeFeed,
    resources: &[String],
    policy: &ReconnectPolicy,
    health: &watch::Sender<FeedHealth>,
) -> Option<broadcast::Receiver<ChangeEvent>> {
    for attempt in 1..=policy.max_retries {
        health.send_replace(FeedHealth::Reconnecting { attempt });
        tokio::time::sleep(policy.delay_for(attempt)).await;

        match transport.connect(resources).await {
            Ok(receiver) => return Some(receiver),
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Feed reconnection attempt failed");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::sync::mpsc;

    use super::*;
    use crate::feed::MemoryFeed;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(3, Duration::from_millis(5), Duration::from_millis(20)).unwrap()
    }

    fn resources(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn collector() -> (
        impl Fn(ChangeEvent) + Send + Sync + 'static,
        mpsc::UnboundedReceiver<ChangeEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            move |event| {
                let _ = tx.send(event);
            },
            rx,
        )
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChangeEvent>) -> ChangeEvent {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("callback channel closed")
    }

    async fn wait_health(
        health: &mut watch::Receiver<FeedHealth>,
        predicate: impl FnMut(&FeedHealth) -> bool,
    ) -> FeedHealth {
        let state = tokio::time::timeout(Duration::from_secs(2), health.wait_for(predicate))
            .await
            .expect("timed out waiting for health")
            .expect("health sender dropped");
        *state
    }

    #[tokio::test]
    async fn test_delivers_only_opened_resources() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, mut rx) = collector();

        let connection = bridge
            .open(&resources(&["expenses"]), on_event)
            .await
            .unwrap();
        assert_eq!(connection.current_health(), FeedHealth::Connected);

        feed.publish(&ChangeEvent::created("stocks")).await.unwrap();
        feed.publish(&ChangeEvent::updated("expenses")).await.unwrap();

        assert_eq!(next_event(&mut rx).await, ChangeEvent::updated("expenses"));
        connection.close().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_lag_marks_every_resource_unknown() {
        let feed = Arc::new(MemoryFeed::with_capacity(1));
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, mut rx) = collector();

        let connection = bridge
            .open(&resources(&["expenses", "vehicles"]), on_event)
            .await
            .unwrap();

        for _ in 0..3 {
            feed.publish(&ChangeEvent::created("expenses")).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(next_event(&mut rx).await);
        }

        assert!(seen.contains(&ChangeEvent::new("expenses", EventKind::Unknown)));
        assert!(seen.contains(&ChangeEvent::new("vehicles", EventKind::Unknown)));
        connection.close().await;
    }

    #[tokio::test]
    async fn test_reconnects_after_transport_loss() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, mut rx) = collector();

        let connection = bridge
            .open(&resources(&["expenses"]), on_event)
            .await
            .unwrap();
        let mut health = connection.health();

        feed.drop_connections().await;

        wait_health(&mut health, |h| matches!(h, FeedHealth::Reconnecting { .. })).await;
        wait_health(&mut health, |h| *h == FeedHealth::Connected).await;
        assert_eq!(feed.total_connects(), 2);

        feed.publish(&ChangeEvent::deleted("expenses")).await.unwrap();
        assert_eq!(next_event(&mut rx).await, ChangeEvent::deleted("expenses"));
        connection.close().await;
    }

    #[tokio::test]
    async fn test_exhausted_retries_report_connection_lost() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, _rx) = collector();

        let connection = bridge
            .open(&resources(&["expenses"]), on_event)
            .await
            .unwrap();
        let mut health = connection.health();

        feed.fail_next_connects(10);
        feed.drop_connections().await;

        let state = wait_health(&mut health, |h| !h.is_live()).await;
        assert_eq!(state, FeedHealth::ConnectionLost);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_open_retries_failed_handshake() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, _rx) = collector();

        feed.fail_next_connects(2);
        let connection = bridge
            .open(&resources(&["expenses"]), on_event)
            .await
            .unwrap();

        assert_eq!(connection.current_health(), FeedHealth::Connected);
        assert_eq!(feed.total_connects(), 1);
        connection.close().await;
    }

    #[tokio::test]
    async fn test_open_fails_when_retries_exhausted() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, _rx) = collector();

        feed.fail_next_connects(10);
        let result = bridge.open(&resources(&["expenses"]), on_event).await;

        assert_eq!(
            result.map(|connection| connection.id()),
            Err(FeedError::ConnectionLost { attempts: 3 })
        );
    }

    #[tokio::test]
    async fn test_close_releases_transport_connection() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, _rx) = collector();

        let connection = bridge
            .open(&resources(&["expenses"]), on_event)
            .await
            .unwrap();
        let health = connection.health();
        assert_eq!(feed.active_connections().await, 1);

        connection.close().await;

        assert_eq!(feed.active_connections().await, 0);
        assert_eq!(*health.borrow(), FeedHealth::Closed);
    }

    #[tokio::test]
    async fn test_drop_releases_transport_connection() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed.clone(), policy());
        let (on_event, _rx) = collector();

        let connection = bridge
            .open(&resources(&["expenses"]), on_event)
            .await
            .unwrap();
        let mut health = connection.health();
        drop(connection);

        wait_health(&mut health, |h| *h == FeedHealth::Closed).await;
        tokio::task::yield_now().await;
        assert_eq!(feed.active_connections().await, 0);
    }

    #[tokio::test]
    async fn test_connection_ids_are_unique() {
        let feed = Arc::new(MemoryFeed::new());
        let bridge = ChangeFeedBridge::new(feed, policy());

        let (first_cb, _rx1) = collector();
        let (second_cb, _rx2) = collector();
        let first = bridge.open(&resources(&["a"]), first_cb).await.unwrap();
        let second = bridge.open(&resources(&["a"]), second_cb).await.unwrap();

        assert_ne!(first.id(), second.id());
        first.close().await;
        second.close().await;
    }
}
