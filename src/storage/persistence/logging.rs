//! Sink that records writes as log lines.

use crate::Result;
use crate::models::{StoreItem, Tombstone};
use crate::storage::traits::PersistenceSink;
use async_trait::async_trait;
use serde::Serialize;

/// Persistence sink that only logs.
///
/// Stands in for a real database during development: each write is
/// emitted at `info` with the item ID, and the full JSON body at `debug`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingSink;

impl LoggingSink {
    /// Creates a logging sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl<T> PersistenceSink<T> for LoggingSink
where
    T: StoreItem + Serialize,
{
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn write_item(&self, item: &T) -> Result<()> {
        tracing::info!(kind = T::KIND, id = %item.id(), "Persisted item");
        if tracing::enabled!(tracing::Level::DEBUG) {
            match serde_json::to_string(item) {
                Ok(body) => tracing::debug!(kind = T::KIND, id = %item.id(), %body, "Item body"),
                Err(e) => tracing::debug!(kind = T::KIND, id = %item.id(), error = %e, "Item not serializable"),
            }
        }
        Ok(())
    }

    async fn delete_item(&self, tombstone: &Tombstone<T::Id>) -> Result<()> {
        let flags = serde_json::Value::Object(tombstone.metadata().into_iter().collect());
        tracing::info!(
            kind = T::KIND,
            id = %tombstone.id,
            deleted_at = %tombstone.deleted_at,
            %flags,
            "Deleted item"
        );
        Ok(())
    }
}
