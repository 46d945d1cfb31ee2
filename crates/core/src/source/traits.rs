use async_trait::async_trait;

use crate::aggregate::DatedAmount;

use super::Result;

/// The data-fetch collaborator: loads the raw records behind an aggregate.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Loads every record addressed by `resource_key`.
    ///
    /// `resource_key` is the resource name optionally followed by scope
    /// segments (`"expenses:retailer:42"`). Order of the result is irrelevant.
    async fn load_records(&self, resource_key: &str) -> Result<Vec<DatedAmount>>;
}
