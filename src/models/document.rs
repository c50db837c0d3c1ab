//! Vector documents.

use super::{DocumentId, Metadata, StoreItem};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A text document with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Unique identifier (`doc_<n>`).
    pub id: DocumentId,
    /// Source text.
    pub content: String,
    /// Embedding vector.
    pub embedding: Vec<f32>,
    /// Caller-supplied metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

impl VectorDocument {
    /// Returns the embedding dimensionality.
    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }
}

impl StoreItem for VectorDocument {
    type Id = DocumentId;

    const KIND: &'static str = "vector_document";

    fn id(&self) -> &DocumentId {
        &self.id
    }
}
