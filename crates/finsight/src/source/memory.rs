//! In-memory record source.

use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use finsight_core::aggregate::DatedAmount;
use finsight_core::feed::{ChangeEvent, ChangeFeed, EventKind};
use finsight_core::source::{RecordSource, Result, SourceError};

/// In-memory record store standing in for the remote database.
///
/// Records live under a resource key (`"expenses"` or
/// `"expenses:retailer:42"`). Loading a key returns its own records plus
/// those of every narrower scope beneath it. Writes publish a change event
/// for the resource when a feed is attached.
#[derive(Clone)]
pub struct InMemoryRecordSource {
    records: Arc<RwLock<HashMap<String, HashMap<String, DatedAmount>>>>,
    feed: Option<Arc<dyn ChangeFeed>>,
    unavailable: Arc<AtomicBool>,
    loads: Arc<AtomicU64>,
}

impl std::fmt::Debug for InMemoryRecordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRecordSource")
            .field("has_feed", &self.feed.is_some())
            .field("unavailable", &self.unavailable.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl Default for InMemoryRecordSource {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRecordSource {
    /// Creates an empty source that publishes nothing.
    pub fn new() -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            feed: None,
            unavailable: Arc::new(AtomicBool::new(false)),
            loads: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates an empty source that announces writes on `feed`.
    pub fn with_feed(feed: Arc<dyn ChangeFeed>) -> Self {
        Self {
            feed: Some(feed),
            ..Self::new()
        }
    }

    /// Stores a new record with a generated id and returns it.
    pub async fn insert(
        &self,
        resource_key: &str,
        date: NaiveDate,
        amount: Decimal,
    ) -> Result<DatedAmount> {
        let record = DatedAmount::new(Uuid::new_v4().to_string(), date, amount);
        self.insert_record(resource_key, record.clone()).await?;
        Ok(record)
    }

    /// Stores `record`, replacing any record with the same id.
    pub async fn insert_record(&self, resource_key: &str, record: DatedAmount) -> Result<()> {
        let resource = resource_name(resource_key)?;
        {
            let mut records = self.records.write().await;
            records
                .entry(resource_key.to_string())
                .or_default()
                .insert(record.id.clone(), record);
        }
        self.announce(resource, EventKind::Created).await;
        Ok(())
    }

    /// Changes the amount of an existing record.
    pub async fn update(&self, resource_key: &str, id: &str, amount: Decimal) -> Result<()> {
        let resource = resource_name(resource_key)?;
        {
            let mut records = self.records.write().await;
            let record = records
                .get_mut(resource_key)
                .and_then(|scope| scope.get_mut(id))
                .ok_or_else(|| not_found(resource_key, id))?;
            record.amount = amount;
        }
        self.announce(resource, EventKind::Updated).await;
        Ok(())
    }

    /// Removes a record.
    pub async fn delete(&self, resource_key: &str, id: &str) -> Result<()> {
        let resource = resource_name(resource_key)?;
        {
            let mut records = self.records.write().await;
            records
                .get_mut(resource_key)
                .and_then(|scope| scope.remove(id))
                .ok_or_else(|| not_found(resource_key, id))?;
        }
        self.announce(resource, EventKind::Deleted).await;
        Ok(())
    }

    /// Makes every subsequent load fail with `SourceError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `load_records` calls served so far.
    pub fn load_count(&self) -> u64 {
        self.loads.load(Ordering::SeqCst)
    }

    async fn announce(&self, resource: &str, kind: EventKind) {
        let Some(feed) = &self.feed else {
            return;
        };
        if let Err(e) = feed.publish(&ChangeEvent::new(resource, kind)).await {
            // The write stands; subscribers just miss this change.
            tracing::warn!(resource, %kind, error = %e, "Failed to publish change event");
        }
    }
}

#[async_trait]
impl RecordSource for InMemoryRecordSource {
    async fn load_records(&self, resource_key: &str) -> Result<Vec<DatedAmount>> {
        resource_name(resource_key)?;
        self.loads.fetch_add(1, Ordering::SeqCst);

        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable(format!(
                "cannot load {}",
                resource_key
            )));
        }

        let nested = format!("{}:", resource_key);
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|(key, _)| *key == resource_key || key.starts_with(&nested))
            .flat_map(|(_, scope)| scope.values().cloned())
            .collect())
    }
}

/// Validates a resource key and returns its resource name.
fn resource_name(resource_key: &str) -> Result<&str> {
    if resource_key.is_empty() || resource_key.split(':').any(str::is_empty) {
        return Err(SourceError::InvalidKey(resource_key.to_string()));
    }
    Ok(resource_key.split(':').next().unwrap_or(resource_key))
}

fn not_found(resource_key: &str, id: &str) -> SourceError {
    SourceError::NotFound {
        resource: resource_key.to_string(),
        id: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::MemoryFeed;
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_load() {
        let source = InMemoryRecordSource::new();
        let record = source
            .insert("expenses", date(2024, 2, 10), dec!(50))
            .await
            .unwrap();

        let loaded = source.load_records("expenses").await.unwrap();
        assert_eq!(loaded, vec![record]);
        assert_eq!(source.load_count(), 1);
    }

    #[tokio::test]
    async fn test_load_includes_narrower_scopes() {
        let source = InMemoryRecordSource::new();
        source
            .insert("expenses", date(2024, 1, 1), dec!(10))
            .await
            .unwrap();
        source
            .insert("expenses:retailer:42", date(2024, 1, 2), dec!(20))
            .await
            .unwrap();
        source
            .insert("expenses_archive", date(2024, 1, 3), dec!(99))
            .await
            .unwrap();

        let all = source.load_records("expenses").await.unwrap();
        let scoped = source.load_records("expenses:retailer:42").await.unwrap();

        assert_eq!(all.len(), 2);
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].amount, dec!(20));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let source = InMemoryRecordSource::new();
        let record = source
            .insert("vehicles", date(2024, 3, 1), dec!(100))
            .await
            .unwrap();

        source.update("vehicles", &record.id, dec!(150)).await.unwrap();
        let loaded = source.load_records("vehicles").await.unwrap();
        assert_eq!(loaded[0].amount, dec!(150));

        source.delete("vehicles", &record.id).await.unwrap();
        assert!(source.load_records("vehicles").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let source = InMemoryRecordSource::new();
        let result = source.delete("stocks", "nope").await;
        assert_eq!(
            result,
            Err(SourceError::NotFound {
                resource: "stocks".to_string(),
                id: "nope".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() {
        let source = InMemoryRecordSource::new();
        for key in ["", "expenses:", ":retailer", "a::b"] {
            assert_eq!(
                source.load_records(key).await,
                Err(SourceError::InvalidKey(key.to_string())),
                "{key}"
            );
        }
    }

    #[tokio::test]
    async fn test_unavailable_source_fails_loads() {
        let source = InMemoryRecordSource::new();
        source.set_unavailable(true);
        assert!(matches!(
            source.load_records("expenses").await,
            Err(SourceError::Unavailable(_))
        ));

        source.set_unavailable(false);
        assert!(source.load_records("expenses").await.is_ok());
    }

    #[tokio::test]
    async fn test_writes_publish_change_events() {
        let feed = Arc::new(MemoryFeed::new());
        let mut rx = feed.connect(&["expenses".to_string()]).await.unwrap();
        let source = InMemoryRecordSource::with_feed(feed.clone());

        let record = source
            .insert("expenses:retailer:42", date(2024, 1, 2), dec!(20))
            .await
            .unwrap();
        source
            .update("expenses:retailer:42", &record.id, dec!(25))
            .await
            .unwrap();
        source
            .delete("expenses:retailer:42", &record.id)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::created("expenses"));
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::updated("expenses"));
        assert_eq!(rx.recv().await.unwrap(), ChangeEvent::deleted("expenses"));
    }
}
