//! Generic write-behind store.
//!
//! Composes the primary store, write-behind queue, event bus and ID
//! generator. Every mutation takes effect in three places, in this order:
//!
//! 1. the primary store (visible to `get` and `scan` immediately)
//! 2. the write-behind queue (picked up by the next flush)
//! 3. the event bus (delivered to live subscribers)
//!
//! None of the three waits on I/O.

use super::{PrimaryStore, Snapshot, WriteBehindQueue};
use crate::models::{IdGenerator, PendingWrite, StoreEvent, StoreItem, Tombstone};
use crate::observability::{EventBus, Subscription};
use std::sync::Arc;

/// In-memory store with asynchronous, batched persistence.
#[derive(Debug)]
pub struct WriteBehindStore<T: StoreItem> {
    primary: PrimaryStore<T>,
    queue: Arc<WriteBehindQueue<T>>,
    events: EventBus<T>,
    ids: IdGenerator,
}

impl<T: StoreItem> WriteBehindStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            primary: PrimaryStore::new(),
            queue: Arc::new(WriteBehindQueue::new()),
            events: EventBus::new(),
            ids: IdGenerator::new(),
        }
    }

    /// Returns the next sequence number for building an item ID.
    pub fn next_sequence(&self) -> u64 {
        self.ids.next_value()
    }

    /// Stores an item, queues it for persistence and notifies subscribers.
    pub fn put(&self, item: T) -> Arc<T> {
        let item = Arc::new(item);
        let revision = self.primary.put(Arc::clone(&item));
        self.queue.enqueue(PendingWrite::Upsert(Arc::clone(&item)));
        self.events.publish(&StoreEvent::Stored {
            revision,
            item: Arc::clone(&item),
        });

        metrics::counter!("store_put_total", "kind" => T::KIND).increment(1);
        tracing::trace!(kind = T::KIND, id = %item.id(), revision, "Stored item");
        item
    }

    /// Returns the item with the given ID, if present.
    #[must_use]
    pub fn get(&self, id: &T::Id) -> Option<Arc<T>> {
        self.primary.get(id)
    }

    /// Removes an item.
    ///
    /// Returns false, and queues nothing, if the item was not present.
    pub fn delete(&self, id: &T::Id) -> bool {
        let Some((_, revision)) = self.primary.remove(id) else {
            return false;
        };
        self.queue
            .enqueue(PendingWrite::Tombstone(Tombstone::now(id.clone())));
        self.events.publish(&StoreEvent::Removed {
            revision,
            id: id.clone(),
        });

        metrics::counter!("store_delete_total", "kind" => T::KIND).increment(1);
        tracing::trace!(kind = T::KIND, %id, revision, "Deleted item");
        true
    }

    /// Point-in-time snapshot of every item, in insertion order.
    #[must_use]
    pub fn scan(&self) -> Snapshot<T> {
        self.primary.scan()
    }

    /// Number of items currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Returns true if the store holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Returns the queue for a flush scheduler to drain.
    #[must_use]
    pub fn queue(&self) -> Arc<WriteBehindQueue<T>> {
        Arc::clone(&self.queue)
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.events.subscriber_count()
    }

    /// Subscribes to every future change.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        self.events.subscribe()
    }

    /// Subscribes to future changes matching `predicate`.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> Subscription<T>
    where
        F: Fn(&StoreEvent<T>) -> bool + Send + Sync + 'static,
    {
        self.events.subscribe_filtered(predicate)
    }

    /// Subscribes to current contents followed by future changes, both
    /// restricted to `predicate`.
    #[must_use]
    pub fn subscribe_with_snapshot<F>(&self, predicate: F) -> Subscription<T>
    where
        F: Fn(&StoreEvent<T>) -> bool + Send + Sync + 'static,
    {
        self.events
            .subscribe_with_snapshot(|| self.primary.scan(), predicate)
    }
}

impl<T: StoreItem> Default for WriteBehindStore<T> {
    fn default() -> Self {
        Self::new()
    }
}
