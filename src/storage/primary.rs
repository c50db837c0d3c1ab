//! Concurrent primary store.
//!
//! The authoritative in-memory copy of every item. Reads never touch the
//! persistence layer.
//!
//! # Revisions
//!
//! Every `put` and successful `remove` is stamped with a revision drawn from
//! a per-store counter while the entry's shard lock is held. Two writes to
//! the same key therefore carry revisions in the order they landed, and a
//! [`Snapshot`] can record the highest revision whose effect it reflects.

use crate::models::StoreItem;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// A stored item plus its bookkeeping.
#[derive(Debug)]
struct Slot<T> {
    /// Revision of the first insertion; fixes the scan position.
    inserted: u64,
    /// Revision of the latest write.
    revision: u64,
    item: Arc<T>,
}

/// Concurrent key→item map.
#[derive(Debug)]
pub struct PrimaryStore<T: StoreItem> {
    entries: DashMap<T::Id, Slot<T>>,
    next_revision: AtomicU64,
}

impl<T: StoreItem> PrimaryStore<T> {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_revision: AtomicU64::new(1),
        }
    }

    /// Inserts or overwrites an item, returning the write's revision.
    ///
    /// An overwrite keeps the item's original scan position.
    pub fn put(&self, item: Arc<T>) -> u64 {
        match self.entries.entry(item.id().clone()) {
            Entry::Occupied(mut occupied) => {
                let revision = self.stamp();
                let slot = occupied.get_mut();
                slot.revision = revision;
                slot.item = item;
                revision
            },
            Entry::Vacant(vacant) => {
                let revision = self.stamp();
                vacant.insert(Slot {
                    inserted: revision,
                    revision,
                    item,
                });
                revision
            },
        }
    }

    /// Returns the item with the given ID, if present.
    #[must_use]
    pub fn get(&self, id: &T::Id) -> Option<Arc<T>> {
        self.entries.get(id).map(|slot| Arc::clone(&slot.item))
    }

    /// Returns true if an item with the given ID is present.
    #[must_use]
    pub fn contains(&self, id: &T::Id) -> bool {
        self.entries.contains_key(id)
    }

    /// Removes an item, returning it with the removal's revision.
    pub fn remove(&self, id: &T::Id) -> Option<(Arc<T>, u64)> {
        match self.entries.entry(id.clone()) {
            Entry::Occupied(occupied) => {
                let revision = self.stamp();
                let (_, slot) = occupied.remove_entry();
                Some((slot.item, revision))
            },
            Entry::Vacant(_) => None,
        }
    }

    /// Number of items currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the store holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Highest revision handed out so far (0 before the first write).
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.next_revision.load(Ordering::Acquire).saturating_sub(1)
    }

    /// Takes a snapshot of every item, in insertion order.
    ///
    /// Items inserted after the scan starts are left out. Items overwritten
    /// during the scan appear with the newer value.
    #[must_use]
    pub fn scan(&self) -> Snapshot<T> {
        // Read the high-water mark first: any insertion at or below it was
        // stamped under a shard lock the iteration below must also take.
        let revision = self.revision();
        let mut entries: Vec<(u64, u64, Arc<T>)> = self
            .entries
            .iter()
            .filter(|slot| slot.inserted <= revision)
            .map(|slot| (slot.inserted, slot.revision, Arc::clone(&slot.item)))
            .collect();
        entries.sort_by_key(|(inserted, _, _)| *inserted);

        let (revisions, items): (Vec<u64>, Vec<Arc<T>>) = entries
            .into_iter()
            .map(|(_, written, item)| (written, item))
            .unzip();
        Snapshot {
            revision,
            items: items.into(),
            revisions: revisions.into(),
        }
    }

    fn stamp(&self) -> u64 {
        self.next_revision.fetch_add(1, Ordering::AcqRel)
    }
}

impl<T: StoreItem> Default for PrimaryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a [`PrimaryStore`].
///
/// Iterating is restartable: the snapshot can be walked any number of times
/// and never reflects items inserted after it was taken. Most items were
/// written at or below [`Snapshot::revision`]; the exceptions were
/// overwritten mid-scan and carry their own revision in
/// [`Snapshot::iter_with_revisions`].
#[derive(Debug)]
pub struct Snapshot<T> {
    revision: u64,
    items: Arc<[Arc<T>]>,
    revisions: Arc<[u64]>,
}

impl<T> Snapshot<T> {
    /// Highest store revision reflected by this snapshot.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of items in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Iterates over the items in insertion order.
    pub fn iter(&self) -> std::slice::Iter<'_, Arc<T>> {
        self.items.iter()
    }

    #[cfg(test)]
    pub(crate) fn from_parts(revision: u64, entries: Vec<(u64, Arc<T>)>) -> Self {
        let (revisions, items): (Vec<u64>, Vec<Arc<T>>) = entries.into_iter().unzip();
        Self {
            revision,
            items: items.into(),
            revisions: revisions.into(),
        }
    }

    /// Iterates over `(revision, item)` pairs in insertion order, where the
    /// revision is that of the write the snapshot captured.
    pub fn iter_with_revisions(&self) -> impl Iterator<Item = (u64, &Arc<T>)> {
        self.revisions.iter().copied().zip(self.items.iter())
    }

    /// Returns the items as a vector of shared handles.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Arc<T>> {
        self.items.to_vec()
    }
}

impl<T> Clone for Snapshot<T> {
    fn clone(&self) -> Self {
        Self {
            revision: self.revision,
            items: Arc::clone(&self.items),
            revisions: Arc::clone(&self.revisions),
        }
    }
}

impl<'a, T> IntoIterator for &'a Snapshot<T> {
    type Item = &'a Arc<T>;
    type IntoIter = std::slice::Iter<'a, Arc<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DocumentId, VectorDocument};
    use chrono::Utc;

    fn doc(id: &str, content: &str) -> Arc<VectorDocument> {
        Arc::new(VectorDocument {
            id: DocumentId::new(id),
            content: content.to_string(),
            embedding: vec![1.0, 0.0],
            metadata: crate::models::Metadata::new(),
            timestamp: Utc::now(),
        })
    }

    #[test]
    fn test_read_your_write() {
        let store = PrimaryStore::new();
        let item = doc("doc_1", "hello");
        store.put(Arc::clone(&item));

        let fetched = store.get(&DocumentId::new("doc_1")).expect("item present");
        assert_eq!(fetched, item);
        assert!(store.contains(&DocumentId::new("doc_1")));
        assert!(store.get(&DocumentId::new("doc_2")).is_none());
    }

    #[test]
    fn test_overwrite_is_last_write_wins() {
        let store = PrimaryStore::new();
        let first = store.put(doc("doc_1", "first"));
        let second = store.put(doc("doc_1", "second"));

        assert!(second > first);
        assert_eq!(store.len(), 1);
        let fetched = store.get(&DocumentId::new("doc_1")).expect("item present");
        assert_eq!(fetched.content, "second");
    }

    #[test]
    fn test_remove() {
        let store = PrimaryStore::new();
        store.put(doc("doc_1", "x"));

        let (removed, revision) = store.remove(&DocumentId::new("doc_1")).expect("removed");
        assert_eq!(removed.content, "x");
        assert_eq!(revision, 2);
        assert!(store.is_empty());
        assert!(store.remove(&DocumentId::new("doc_1")).is_none());
        // A miss does not consume a revision.
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn test_scan_is_insertion_ordered_and_stable() {
        let store = PrimaryStore::new();
        for i in 1..=20 {
            store.put(doc(&format!("doc_{i}"), "x"));
        }
        // Overwrite keeps position.
        store.put(doc("doc_3", "updated"));

        let snapshot = store.scan();
        let ids: Vec<String> = snapshot.iter().map(|d| d.id.to_string()).collect();
        let expected: Vec<String> = (1..=20).map(|i| format!("doc_{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(snapshot.revision(), 21);

        // Restartable and detached from later writes.
        store.put(doc("doc_99", "late"));
        assert_eq!(snapshot.iter().count(), 20);
        assert_eq!((&snapshot).into_iter().count(), 20);
        assert_eq!(store.scan().len(), 21);
    }

    #[test]
    fn test_snapshot_records_write_revisions() {
        let store = PrimaryStore::new();
        store.put(doc("doc_1", "a"));
        store.put(doc("doc_2", "b"));
        store.put(doc("doc_1", "c"));

        let snapshot = store.scan();
        let pairs: Vec<(u64, String)> = snapshot
            .iter_with_revisions()
            .map(|(revision, d)| (revision, d.content.clone()))
            .collect();
        assert_eq!(pairs, vec![(3, "c".to_string()), (2, "b".to_string())]);
        assert_eq!(snapshot.revision(), 3);
    }

    #[test]
    fn test_reinsert_after_remove_moves_to_end() {
        let store = PrimaryStore::new();
        store.put(doc("doc_1", "a"));
        store.put(doc("doc_2", "b"));
        store.remove(&DocumentId::new("doc_1"));
        store.put(doc("doc_1", "c"));

        let ids: Vec<String> = store.scan().iter().map(|d| d.id.to_string()).collect();
        assert_eq!(ids, vec!["doc_2", "doc_1"]);
    }
}
