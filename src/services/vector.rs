//! Vector document store with similarity search.

use super::flush::{FlushHandle, FlushScheduler};
use super::similarity::{self, MismatchPolicy};
use crate::Result;
use crate::config::VectorSettings;
use crate::models::{DocumentId, Metadata, SimilarityResult, VectorDocument};
use crate::observability::Subscription;
use crate::storage::{PersistenceSink, Snapshot, WriteBehindStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::instrument;

/// Write-behind store of embedded documents.
///
/// Cheap to clone; clones share the same underlying store.
#[derive(Debug, Clone)]
pub struct VectorStore {
    store: Arc<WriteBehindStore<VectorDocument>>,
    settings: VectorSettings,
}

impl VectorStore {
    /// Creates an empty vector store.
    #[must_use]
    pub fn new(settings: &VectorSettings) -> Self {
        Self {
            store: Arc::new(WriteBehindStore::new()),
            settings: *settings,
        }
    }

    /// Stores a document under the next `doc_<n>` ID.
    pub fn store_document(
        &self,
        content: impl Into<String>,
        embedding: Vec<f32>,
        metadata: Metadata,
    ) -> Arc<VectorDocument> {
        let document = VectorDocument {
            id: DocumentId::from_sequence(self.store.next_sequence()),
            content: content.into(),
            embedding,
            metadata,
            timestamp: Utc::now(),
        };
        tracing::debug!(id = %document.id, dimensions = document.dimensions(), "Storing document");
        self.store.put(document)
    }

    /// Returns a document by ID.
    #[must_use]
    pub fn get_document(&self, id: &DocumentId) -> Option<Arc<VectorDocument>> {
        self.store.get(id)
    }

    /// Snapshot of every document, oldest first.
    #[must_use]
    pub fn all_documents(&self) -> Snapshot<VectorDocument> {
        self.store.scan()
    }

    /// Deletes a document. Returns false if it did not exist.
    pub fn delete_document(&self, id: &DocumentId) -> bool {
        self.store.delete(id)
    }

    /// Ranks stored documents against `query` using the configured
    /// mismatch policy.
    ///
    /// # Errors
    ///
    /// See [`similarity::search`].
    pub fn similarity_search(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SimilarityResult>> {
        self.similarity_search_with(query, top_k, min_score, self.settings.mismatch_policy)
    }

    /// Ranks stored documents against `query` with the configured defaults
    /// for `top_k` and `min_score`.
    ///
    /// # Errors
    ///
    /// See [`similarity::search`].
    pub fn search_with_defaults(&self, query: &[f32]) -> Result<Vec<SimilarityResult>> {
        self.similarity_search(
            query,
            self.settings.default_top_k,
            self.settings.default_min_score,
        )
    }

    /// Ranks stored documents against `query` with an explicit policy.
    ///
    /// # Errors
    ///
    /// See [`similarity::search`].
    #[instrument(skip(self, query), fields(dimensions = query.len()))]
    pub fn similarity_search_with(
        &self,
        query: &[f32],
        top_k: usize,
        min_score: f32,
        policy: MismatchPolicy,
    ) -> Result<Vec<SimilarityResult>> {
        let snapshot = self.store.scan();
        let results = similarity::search(&snapshot, query, top_k, min_score, policy)?;
        tracing::debug!(
            candidates = snapshot.len(),
            matched = results.len(),
            "Similarity search complete"
        );
        Ok(results)
    }

    /// Every change from now on.
    #[must_use]
    pub fn watch(&self) -> Subscription<VectorDocument> {
        self.store.subscribe()
    }

    /// Number of stored documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Returns true if no documents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// The underlying generic store.
    #[must_use]
    pub fn store(&self) -> &WriteBehindStore<VectorDocument> {
        &self.store
    }

    /// Builds a flush scheduler for this store without starting it.
    #[must_use]
    pub fn flusher(
        &self,
        sink: Arc<dyn PersistenceSink<VectorDocument>>,
    ) -> Arc<FlushScheduler<VectorDocument>> {
        Arc::new(FlushScheduler::new(
            self.store.queue(),
            sink,
            &self.settings.flush,
        ))
    }

    /// Starts background flushing into `sink`.
    #[must_use]
    pub fn spawn_flusher(&self, sink: Arc<dyn PersistenceSink<VectorDocument>>) -> FlushHandle {
        self.flusher(sink).spawn()
    }
}
