use async_trait::async_trait;
use tokio::sync::broadcast;

use super::{ChangeEvent, Result};

/// A publish/subscribe transport delivering resource change events.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    /// Opens one transport connection carrying events for `resources`.
    ///
    /// The returned receiver yields `RecvError::Closed` when the transport
    /// drops the connection; callers reconnect by calling `connect` again.
    /// Transports may deliver events for other resources too, so callers
    /// filter by resource name.
    async fn connect(&self, resources: &[String]) -> Result<broadcast::Receiver<ChangeEvent>>;

    /// Publishes a change event to every connected subscriber.
    async fn publish(&self, event: &ChangeEvent) -> Result<()>;
}
