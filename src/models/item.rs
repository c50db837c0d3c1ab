//! The item abstraction shared by every store variant.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Free-form key/value metadata attached to an item.
pub type Metadata = BTreeMap<String, Value>;

/// Metadata key marking a deletion record.
pub const DELETED_FLAG: &str = "_deleted";

/// An item that can live in a [`crate::WriteBehindStore`].
///
/// Implementors are immutable once created; overwrites replace the whole
/// item behind a fresh `Arc`.
pub trait StoreItem: fmt::Debug + Send + Sync + 'static {
    /// Identifier type. Assigned once and never reused.
    type Id: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static;

    /// Short label used in logs and metrics ("chat_message", "vector_document").
    const KIND: &'static str;

    /// Returns the item's identifier.
    fn id(&self) -> &Self::Id;
}

/// Deletion marker propagated through the write-behind queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tombstone<Id> {
    /// Identifier of the deleted item.
    pub id: Id,
    /// When the deletion happened.
    pub deleted_at: DateTime<Utc>,
}

impl<Id> Tombstone<Id> {
    /// Creates a tombstone stamped with the current time.
    #[must_use]
    pub fn now(id: Id) -> Self {
        Self {
            id,
            deleted_at: Utc::now(),
        }
    }

    /// Metadata for sinks that store deletions as flagged records.
    #[must_use]
    pub fn metadata(&self) -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(DELETED_FLAG.to_string(), Value::Bool(true));
        metadata
    }
}

/// A unit of work waiting in the write-behind queue.
#[derive(Debug)]
pub enum PendingWrite<T: StoreItem> {
    /// Write (insert or overwrite) the item at the persistence layer.
    Upsert(Arc<T>),
    /// Delete the item at the persistence layer.
    Tombstone(Tombstone<T::Id>),
}

impl<T: StoreItem> PendingWrite<T> {
    /// Returns the identifier of the affected item.
    #[must_use]
    pub fn id(&self) -> &T::Id {
        match self {
            Self::Upsert(item) => item.id(),
            Self::Tombstone(tombstone) => &tombstone.id,
        }
    }

    /// Returns true for deletion markers.
    #[must_use]
    pub const fn is_tombstone(&self) -> bool {
        matches!(self, Self::Tombstone(_))
    }
}

impl<T: StoreItem> Clone for PendingWrite<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Upsert(item) => Self::Upsert(Arc::clone(item)),
            Self::Tombstone(tombstone) => Self::Tombstone(tombstone.clone()),
        }
    }
}
