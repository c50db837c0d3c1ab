//! Data models for stowaway.
//!
//! This module contains the item types stored by the chat and vector
//! variants, the write-behind queue payload, and the event types.

mod chat;
mod document;
mod events;
mod id;
mod item;
mod search;

pub use chat::{ChatMessage, ChatResponse, ChatRole, ResponseKind};
pub use document::VectorDocument;
pub use events::StoreEvent;
pub use id::{DOCUMENT_ID_PREFIX, DocumentId, IdGenerator, MessageId};
pub use item::{DELETED_FLAG, Metadata, PendingWrite, StoreItem, Tombstone};
pub use search::SimilarityResult;
