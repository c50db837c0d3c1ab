//! Brute-force cosine similarity search.
//!
//! Every stored document is scored against the query; there is no index.
//! Results are filtered by a minimum score, ranked by descending score with
//! ties kept in insertion order, and truncated to `top_k`.

use crate::models::{SimilarityResult, VectorDocument};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// What to do with a stored vector whose length differs from the query's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MismatchPolicy {
    /// Abort the search with [`Error::DimensionMismatch`].
    #[default]
    FailFast,
    /// Leave the document out of the results.
    Skip,
}

impl MismatchPolicy {
    /// Returns the policy as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FailFast => "fail_fast",
            Self::Skip => "skip",
        }
    }

    /// Parses a policy name.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "fail_fast" | "fail" | "error" => Some(Self::FailFast),
            "skip" => Some(Self::Skip),
            _ => None,
        }
    }
}

/// Cosine similarity of two equal-length vectors.
///
/// Returns 0.0 when either vector has zero norm.
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Ranks `documents` against `query`.
///
/// # Errors
///
/// - [`Error::InvalidInput`] if `query` is empty
/// - [`Error::DimensionMismatch`] for the first document of another length,
///   under [`MismatchPolicy::FailFast`]
pub fn search<'a, I>(
    documents: I,
    query: &[f32],
    top_k: usize,
    min_score: f32,
    policy: MismatchPolicy,
) -> Result<Vec<SimilarityResult>>
where
    I: IntoIterator<Item = &'a Arc<VectorDocument>>,
{
    if query.is_empty() {
        return Err(Error::InvalidInput(
            "query vector must not be empty".to_string(),
        ));
    }
    metrics::counter!("similarity_search_total", "policy" => policy.as_str()).increment(1);
    if top_k == 0 {
        return Ok(Vec::new());
    }

    let mut skipped = 0_u64;
    let mut results = Vec::new();
    for document in documents {
        if document.embedding.len() != query.len() {
            match policy {
                MismatchPolicy::FailFast => {
                    return Err(Error::DimensionMismatch {
                        id: document.id.to_string(),
                        expected: query.len(),
                        actual: document.embedding.len(),
                    });
                },
                MismatchPolicy::Skip => {
                    skipped += 1;
                    continue;
                },
            }
        }

        // Adding zero folds -0.0 into 0.0 so the two rank as a tie.
        let score = cosine_similarity(query, &document.embedding) + 0.0;
        if score >= min_score {
            results.push(SimilarityResult {
                document: Arc::clone(document),
                score,
            });
        }
    }

    if skipped > 0 {
        metrics::counter!("similarity_mismatch_skipped_total").increment(skipped);
        tracing::debug!(skipped, dimensions = query.len(), "Skipped mismatched documents");
    }

    // Stable sort: equal scores keep insertion order.
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results.truncate(top_k);
    Ok(results)
}
