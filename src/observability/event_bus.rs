//! Multicast event bus for store notifications.
//!
//! Each subscriber owns an unbounded tokio channel, so a publish never
//! blocks and never drops an event. A subscriber that stops polling keeps
//! accumulating events; the backlog across all subscribers is reported on
//! the `event_bus_pending` gauge. Closed subscribers are pruned on the next
//! publish.

use crate::models::{StoreEvent, StoreItem};
use crate::storage::Snapshot;
use dashmap::DashMap;
use futures::Stream;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// Predicate applied to events before they reach a subscriber.
pub type EventFilter<T> = Arc<dyn Fn(&StoreEvent<T>) -> bool + Send + Sync>;

/// Broadcasts store events to every live subscriber.
pub struct EventBus<T: StoreItem> {
    subscribers: DashMap<u64, mpsc::UnboundedSender<StoreEvent<T>>>,
    next_subscriber: AtomicU64,
}

impl<T: StoreItem> EventBus<T> {
    /// Creates a bus with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscribers: DashMap::new(),
            next_subscriber: AtomicU64::new(1),
        }
    }

    /// Publishes an event to all subscribers.
    pub fn publish(&self, event: &StoreEvent<T>) {
        metrics::counter!("event_bus_publish_total", "kind" => T::KIND).increment(1);

        let mut delivered = 0_u64;
        let mut closed = Vec::new();
        for entry in &self.subscribers {
            if entry.value().send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                closed.push(*entry.key());
            }
        }

        // Removal must happen after iteration releases its shard guards.
        for id in closed {
            self.subscribers.remove(&id);
            tracing::debug!(kind = T::KIND, subscriber = id, "Pruned closed subscriber");
        }

        #[allow(clippy::cast_precision_loss)]
        {
            metrics::gauge!("event_bus_pending", "kind" => T::KIND).increment(delivered as f64);
            metrics::gauge!("event_bus_receivers", "kind" => T::KIND)
                .set(self.subscribers.len() as f64);
        }
    }

    /// Subscribes to every future event.
    #[must_use]
    pub fn subscribe(&self) -> Subscription<T> {
        self.register(None)
    }

    /// Subscribes to future events matching `predicate`.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> Subscription<T>
    where
        F: Fn(&StoreEvent<T>) -> bool + Send + Sync + 'static,
    {
        self.register(Some(Arc::new(predicate)))
    }

    /// Subscribes with a snapshot of current state ahead of live events.
    ///
    /// The subscriber is registered before `take_snapshot` runs. Live events
    /// already reflected in the snapshot are dropped: those at or below its
    /// mark, and those for an item the snapshot caught at a later revision.
    /// Every change therefore arrives exactly once across the seam.
    #[must_use]
    pub fn subscribe_with_snapshot<S, F>(&self, take_snapshot: S, predicate: F) -> Subscription<T>
    where
        S: FnOnce() -> Snapshot<T>,
        F: Fn(&StoreEvent<T>) -> bool + Send + Sync + 'static,
    {
        let filter: EventFilter<T> = Arc::new(predicate);
        let mut subscription = self.register(Some(Arc::clone(&filter)));

        let snapshot = take_snapshot();
        let revision = snapshot.revision();
        subscription.high_water = revision;
        subscription.ahead = snapshot
            .iter_with_revisions()
            .filter(|(written, _)| *written > revision)
            .map(|(written, item)| (item.id().clone(), written))
            .collect();
        subscription.seed = snapshot
            .iter_with_revisions()
            .map(|(written, item)| StoreEvent::Stored {
                revision: written.max(revision),
                item: Arc::clone(item),
            })
            .filter(|event| filter(event))
            .collect();

        tracing::debug!(
            kind = T::KIND,
            revision,
            seeded = subscription.seed.len(),
            ahead = subscription.ahead.len(),
            "Seeded subscription from snapshot"
        );
        subscription
    }

    /// Number of registered subscribers, including ones closed since the
    /// last publish.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn register(&self, filter: Option<EventFilter<T>>) -> Subscription<T> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let id = self.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.subscribers.insert(id, sender);

        metrics::counter!("event_bus_subscriptions_total", "kind" => T::KIND).increment(1);
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("event_bus_receivers", "kind" => T::KIND)
            .set(self.subscribers.len() as f64);

        Subscription {
            seed: VecDeque::new(),
            high_water: 0,
            ahead: HashMap::new(),
            receiver,
            filter,
        }
    }
}

impl<T: StoreItem> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: StoreItem> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("kind", &T::KIND)
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// A live, non-restartable stream of store events.
///
/// Ends (yields `None`) once the publishing store is dropped.
pub struct Subscription<T: StoreItem> {
    seed: VecDeque<StoreEvent<T>>,
    high_water: u64,
    /// Items seeded at a revision above `high_water`.
    ahead: HashMap<T::Id, u64>,
    receiver: mpsc::UnboundedReceiver<StoreEvent<T>>,
    filter: Option<EventFilter<T>>,
}

impl<T: StoreItem> Subscription<T> {
    /// Waits for the next event.
    pub async fn recv(&mut self) -> Option<StoreEvent<T>> {
        futures::StreamExt::next(self).await
    }

    /// Returns the next event if one is already available.
    pub fn try_recv(&mut self) -> Option<StoreEvent<T>> {
        if let Some(event) = self.seed.pop_front() {
            return Some(event);
        }
        while let Ok(event) = self.receiver.try_recv() {
            if let Some(event) = self.accept(event) {
                return Some(event);
            }
        }
        None
    }

    /// Number of events buffered and not yet consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.seed.len() + self.receiver.len()
    }

    fn accept(&self, event: StoreEvent<T>) -> Option<StoreEvent<T>> {
        metrics::gauge!("event_bus_pending", "kind" => T::KIND).decrement(1.0);
        if event.revision() <= self.high_water {
            return None;
        }
        if self
            .ahead
            .get(event.id())
            .is_some_and(|&seeded| event.revision() <= seeded)
        {
            return None;
        }
        match &self.filter {
            Some(filter) if !filter(&event) => None,
            _ => Some(event),
        }
    }
}

// No field is ever pinned.
impl<T: StoreItem> Unpin for Subscription<T> {}

impl<T: StoreItem> Stream for Subscription<T> {
    type Item = StoreEvent<T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(event) = this.seed.pop_front() {
            return Poll::Ready(Some(event));
        }
        loop {
            match this.receiver.poll_recv(cx) {
                Poll::Ready(Some(event)) => {
                    if let Some(event) = this.accept(event) {
                        return Poll::Ready(Some(event));
                    }
                },
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<T: StoreItem> Drop for Subscription<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("event_bus_pending", "kind" => T::KIND)
            .decrement(self.receiver.len() as f64);
    }
}

impl<T: StoreItem> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &T::KIND)
            .field("seeded", &self.seed.len())
            .field("high_water", &self.high_water)
            .field("filtered", &self.filter.is_some())
            .finish_non_exhaustive()
    }
}
