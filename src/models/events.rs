//! Store events broadcast to live subscribers.

use super::StoreItem;
use std::sync::Arc;

/// Events emitted by a write-behind store.
///
/// Every event carries the primary store revision at which the change
/// became visible. Revisions increase strictly within one store.
#[derive(Debug)]
pub enum StoreEvent<T: StoreItem> {
    /// An item was inserted or overwritten.
    Stored {
        /// Store revision of the write.
        revision: u64,
        /// The stored item.
        item: Arc<T>,
    },
    /// An item was removed.
    Removed {
        /// Store revision of the removal.
        revision: u64,
        /// Identifier of the removed item.
        id: T::Id,
    },
}

impl<T: StoreItem> StoreEvent<T> {
    /// Returns the event type name.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Stored { .. } => "stored",
            Self::Removed { .. } => "removed",
        }
    }

    /// Returns the store revision of the change.
    #[must_use]
    pub const fn revision(&self) -> u64 {
        match self {
            Self::Stored { revision, .. } | Self::Removed { revision, .. } => *revision,
        }
    }

    /// Returns the identifier of the affected item.
    #[must_use]
    pub fn id(&self) -> &T::Id {
        match self {
            Self::Stored { item, .. } => item.id(),
            Self::Removed { id, .. } => id,
        }
    }

    /// Returns the stored item, if this is a `Stored` event.
    #[must_use]
    pub const fn item(&self) -> Option<&Arc<T>> {
        match self {
            Self::Stored { item, .. } => Some(item),
            Self::Removed { .. } => None,
        }
    }
}

impl<T: StoreItem> Clone for StoreEvent<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Stored { revision, item } => Self::Stored {
                revision: *revision,
                item: Arc::clone(item),
            },
            Self::Removed { revision, id } => Self::Removed {
                revision: *revision,
                id: id.clone(),
            },
        }
    }
}
