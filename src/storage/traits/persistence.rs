//! Persistence sink trait.

use crate::Result;
use crate::models::{StoreItem, Tombstone};
use async_trait::async_trait;

/// Trait for the external persistence layer behind a write-behind store.
///
/// Sinks are best-effort targets: the flush scheduler calls them from its
/// own task, logs and counts any error, and moves on. Nothing is retried,
/// so a sink that needs stronger guarantees must provide them itself.
#[async_trait]
pub trait PersistenceSink<T: StoreItem>: Send + Sync {
    /// Short name used in logs, metrics and error messages.
    fn name(&self) -> &'static str;

    /// Writes (inserts or overwrites) an item.
    async fn write_item(&self, item: &T) -> Result<()>;

    /// Deletes an item. Deleting an item that was never written succeeds.
    ///
    /// Sinks that keep deletions as flagged records instead of erasing
    /// them take the flag from [`Tombstone::metadata`].
    async fn delete_item(&self, tombstone: &Tombstone<T::Id>) -> Result<()>;
}
