//! Similarity search result types.

use super::VectorDocument;
use serde::Serialize;
use std::sync::Arc;

/// A document matched by similarity search.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    /// The matched document.
    pub document: Arc<VectorDocument>,
    /// Cosine similarity to the query, in `[-1.0, 1.0]`.
    pub score: f32,
}
