//! Lock-free write-behind queue.
//!
//! Holds pending persistence work between the moment an item becomes
//! visible in the primary store and the moment the flush scheduler hands it
//! to a sink. Backed by `crossbeam_queue::SegQueue`:
//!
//! - **Unbounded**: `enqueue` never blocks and never fails
//! - **FIFO**: items from one producer drain in the order they were enqueued
//! - **Single consumer**: only one `drain` runs at a time; a concurrent call
//!   returns an empty batch instead of interleaving

use crate::models::{PendingWrite, StoreItem};
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Multi-producer, single-consumer FIFO of pending writes.
#[derive(Debug)]
pub struct WriteBehindQueue<T: StoreItem> {
    items: SegQueue<PendingWrite<T>>,
    draining: AtomicBool,
    total_enqueued: AtomicU64,
    total_drained: AtomicU64,
}

impl<T: StoreItem> WriteBehindQueue<T> {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            items: SegQueue::new(),
            draining: AtomicBool::new(false),
            total_enqueued: AtomicU64::new(0),
            total_drained: AtomicU64::new(0),
        }
    }

    /// Appends a pending write.
    pub fn enqueue(&self, write: PendingWrite<T>) {
        self.items.push(write);
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("write_behind_enqueued_total", "kind" => T::KIND).increment(1);
        metrics::gauge!("write_behind_queue_depth", "kind" => T::KIND).increment(1.0);
    }

    /// Removes up to `max_batch` writes in FIFO order.
    ///
    /// Returns fewer than `max_batch` (possibly none) when the queue is
    /// shorter, or when another drain is already in progress.
    #[must_use]
    pub fn drain(&self, max_batch: usize) -> Vec<PendingWrite<T>> {
        if max_batch == 0 {
            return Vec::new();
        }

        let Some(_guard) = DrainGuard::acquire(&self.draining) else {
            tracing::warn!(kind = T::KIND, "Concurrent drain rejected");
            return Vec::new();
        };

        let mut batch = Vec::with_capacity(max_batch.min(self.items.len()));
        while batch.len() < max_batch {
            match self.items.pop() {
                Some(write) => batch.push(write),
                None => break,
            }
        }

        let drained = batch.len() as u64;
        self.total_drained.fetch_add(drained, Ordering::Relaxed);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("write_behind_queue_depth", "kind" => T::KIND).decrement(drained as f64);

        batch
    }

    /// Number of writes currently waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing is waiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Writes enqueued over the queue's lifetime.
    #[must_use]
    pub fn total_enqueued(&self) -> u64 {
        self.total_enqueued.load(Ordering::Relaxed)
    }

    /// Writes drained over the queue's lifetime.
    #[must_use]
    pub fn total_drained(&self) -> u64 {
        self.total_drained.load(Ordering::Relaxed)
    }
}

impl<T: StoreItem> Default for WriteBehindQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds the single-consumer flag for the duration of a drain.
struct DrainGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> DrainGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ChatMessage, ChatRole, MessageId, Tombstone};
    use chrono::Utc;
    use std::sync::Arc;

    fn message(id: u64) -> PendingWrite<ChatMessage> {
        PendingWrite::Upsert(Arc::new(ChatMessage {
            id: MessageId::new(id),
            session_id: "s".to_string(),
            content: format!("m{id}"),
            role: ChatRole::User,
            timestamp: Utc::now(),
        }))
    }

    fn ids(batch: &[PendingWrite<ChatMessage>]) -> Vec<u64> {
        batch.iter().map(|w| w.id().value()).collect()
    }

    #[test]
    fn test_drain_fifo_in_batches() {
        let queue = WriteBehindQueue::new();
        for i in 1..=7 {
            queue.enqueue(message(i));
        }

        assert_eq!(ids(&queue.drain(3)), vec![1, 2, 3]);
        assert_eq!(ids(&queue.drain(3)), vec![4, 5, 6]);
        assert_eq!(ids(&queue.drain(3)), vec![7]);
        assert!(queue.drain(3).is_empty());
        assert_eq!(queue.total_enqueued(), 7);
        assert_eq!(queue.total_drained(), 7);
    }

    #[test]
    fn test_drain_does_not_lose_item_at_batch_boundary() {
        let queue = WriteBehindQueue::new();
        for i in 1..=4 {
            queue.enqueue(message(i));
        }

        assert_eq!(queue.drain(2).len(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_zero_batch_drains_nothing() {
        let queue = WriteBehindQueue::new();
        queue.enqueue(message(1));
        assert!(queue.drain(0).is_empty());
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_tombstones_keep_their_place() {
        let queue = WriteBehindQueue::new();
        queue.enqueue(message(1));
        queue.enqueue(PendingWrite::Tombstone(Tombstone::now(MessageId::new(1))));

        let batch = queue.drain(10);
        assert!(!batch[0].is_tombstone());
        assert!(batch[1].is_tombstone());
        assert_eq!(batch[1].id(), &MessageId::new(1));
    }

    #[test]
    fn test_drain_guard_rejects_reentry() {
        let flag = AtomicBool::new(false);
        let first = DrainGuard::acquire(&flag);
        assert!(first.is_some());
        assert!(DrainGuard::acquire(&flag).is_none());
        drop(first);
        assert!(DrainGuard::acquire(&flag).is_some());
    }
}
