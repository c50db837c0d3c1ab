//! In-memory recording sink.

use crate::models::{Metadata, StoreItem, Tombstone};
use crate::storage::traits::PersistenceSink;
use crate::{Error, Result};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// A call observed by a [`MemorySink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall<Id> {
    /// `write_item` was called for the ID.
    Write(Id),
    /// `delete_item` was called for the ID.
    Delete(Id),
}

/// Persistence sink that keeps a log of every call.
///
/// Useful for embedding the store without a database and for asserting on
/// flush behaviour. Failures and latency can be injected.
pub struct MemorySink<T: StoreItem> {
    calls: Mutex<Vec<SinkCall<T::Id>>>,
    persisted: DashSet<T::Id>,
    deleted: DashMap<T::Id, Metadata>,
    failing: DashSet<T::Id>,
    fail_all: AtomicBool,
    latency: Option<Duration>,
}

impl<T: StoreItem> MemorySink<T> {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            persisted: DashSet::new(),
            deleted: DashMap::new(),
            failing: DashSet::new(),
            fail_all: AtomicBool::new(false),
            latency: None,
        }
    }

    /// Sleeps for `latency` inside every call.
    #[must_use]
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Makes every call for `id` fail.
    pub fn fail_on(&self, id: T::Id) {
        self.failing.insert(id);
    }

    /// Makes every call fail (or stop failing).
    pub fn fail_all(&self, fail: bool) {
        self.fail_all.store(fail, Ordering::Relaxed);
    }

    /// Every call in the order it was made, failed ones included.
    #[must_use]
    pub fn calls(&self) -> Vec<SinkCall<T::Id>> {
        self.lock_calls().clone()
    }

    /// Number of `write_item` calls.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.lock_calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Write(_)))
            .count()
    }

    /// Number of `delete_item` calls.
    #[must_use]
    pub fn delete_count(&self) -> usize {
        self.lock_calls()
            .iter()
            .filter(|c| matches!(c, SinkCall::Delete(_)))
            .count()
    }

    /// Returns true if the ID was written and not deleted since.
    #[must_use]
    pub fn is_persisted(&self, id: &T::Id) -> bool {
        self.persisted.contains(id)
    }

    /// Flags of the deletion record kept for `id`, if its last successful
    /// call was a delete.
    #[must_use]
    pub fn deletion_record(&self, id: &T::Id) -> Option<Metadata> {
        self.deleted.get(id).map(|entry| entry.value().clone())
    }

    /// Number of IDs currently persisted.
    #[must_use]
    pub fn persisted_len(&self) -> usize {
        self.persisted.len()
    }

    fn lock_calls(&self) -> std::sync::MutexGuard<'_, Vec<SinkCall<T::Id>>> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    async fn observe(&self, call: SinkCall<T::Id>) -> Result<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let id = match &call {
            SinkCall::Write(id) | SinkCall::Delete(id) => id.clone(),
        };
        let fail = self.fail_all.load(Ordering::Relaxed) || self.failing.contains(&id);
        self.lock_calls().push(call.clone());

        if fail {
            return Err(Error::PersistenceFailed {
                sink: "memory".to_string(),
                id: id.to_string(),
                cause: "injected failure".to_string(),
            });
        }

        match call {
            SinkCall::Write(id) => {
                self.deleted.remove(&id);
                self.persisted.insert(id);
            },
            SinkCall::Delete(id) => {
                self.persisted.remove(&id);
            },
        }
        Ok(())
    }
}

impl<T: StoreItem> Default for MemorySink<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StoreItem> fmt::Debug for MemorySink<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySink")
            .field("kind", &T::KIND)
            .field("persisted", &self.persisted.len())
            .field("latency", &self.latency)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<T: StoreItem> PersistenceSink<T> for MemorySink<T> {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn write_item(&self, item: &T) -> Result<()> {
        self.observe(SinkCall::Write(item.id().clone())).await
    }

    async fn delete_item(&self, tombstone: &Tombstone<T::Id>) -> Result<()> {
        self.observe(SinkCall::Delete(tombstone.id.clone())).await?;
        self.deleted.insert(tombstone.id.clone(), tombstone.metadata());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DELETED_FLAG, DocumentId, VectorDocument};
    use chrono::Utc;

    fn doc(n: u64) -> VectorDocument {
        VectorDocument {
            id: DocumentId::from_sequence(n),
            content: String::new(),
            embedding: vec![1.0],
            metadata: Metadata::new(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_records_calls_in_order() {
        let sink = MemorySink::<VectorDocument>::new();
        sink.write_item(&doc(1)).await.expect("write");
        sink.write_item(&doc(2)).await.expect("write");
        sink.delete_item(&Tombstone::now(DocumentId::from_sequence(1)))
            .await
            .expect("delete");

        assert_eq!(
            sink.calls(),
            vec![
                SinkCall::Write(DocumentId::from_sequence(1)),
                SinkCall::Write(DocumentId::from_sequence(2)),
                SinkCall::Delete(DocumentId::from_sequence(1)),
            ]
        );
        assert_eq!(sink.write_count(), 2);
        assert_eq!(sink.delete_count(), 1);
        assert!(!sink.is_persisted(&DocumentId::from_sequence(1)));
        assert!(sink.is_persisted(&DocumentId::from_sequence(2)));
    }

    #[tokio::test]
    async fn test_deletion_keeps_flagged_record() {
        let sink = MemorySink::<VectorDocument>::new();
        let id = DocumentId::from_sequence(1);
        sink.write_item(&doc(1)).await.expect("write");
        assert!(sink.deletion_record(&id).is_none());

        sink.delete_item(&Tombstone::now(id.clone())).await.expect("delete");
        let record = sink.deletion_record(&id).expect("record kept");
        assert_eq!(record.get(DELETED_FLAG), Some(&serde_json::Value::Bool(true)));

        // A later write replaces the record.
        sink.write_item(&doc(1)).await.expect("write");
        assert!(sink.deletion_record(&id).is_none());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let sink = MemorySink::<VectorDocument>::new();
        sink.fail_on(DocumentId::from_sequence(2));

        assert!(sink.write_item(&doc(1)).await.is_ok());
        let err = sink.write_item(&doc(2)).await.expect_err("injected");
        assert!(matches!(err, Error::PersistenceFailed { .. }));
        assert_eq!(sink.persisted_len(), 1);

        sink.fail_all(true);
        assert!(sink.write_item(&doc(3)).await.is_err());
        assert_eq!(sink.write_count(), 3);
    }
}
