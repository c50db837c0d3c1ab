//! # Stowaway
//!
//! An in-memory write-behind store.
//!
//! Items are written to a concurrent in-memory map that serves every read,
//! queued for background persistence, and broadcast to live subscribers, all
//! without the producer ever waiting on I/O. A periodic flusher drains the
//! queue in bounded batches into a pluggable [`PersistenceSink`].
//!
//! ## Features
//!
//! - Generic [`WriteBehindStore`] parameterized by item type
//! - Lock-free write-behind queue with FIFO batch draining
//! - Multicast event bus with unbounded per-subscriber buffers
//! - Cancellable flush scheduler with skip-on-overlap ticks
//! - Brute-force cosine similarity search for the vector variant
//! - Per-connection message counters for the chat variant
//!
//! ## Example
//!
//! ```rust,ignore
//! use stowaway::{VectorStore, StowawayConfig};
//!
//! let store = VectorStore::new(&StowawayConfig::default().vector);
//! store.store_document("hello", vec![1.0, 0.0], Default::default());
//! let hits = store.similarity_search(&[1.0, 0.0], 5, 0.0)?;
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(missing_docs)]
#![forbid(unsafe_code)]
#![allow(clippy::multiple_crate_versions)]

use thiserror::Error as ThisError;

pub mod config;
pub mod models;
pub mod observability;
pub mod services;
pub mod storage;

pub use config::{ChatSettings, StowawayConfig, VectorSettings};
pub use models::{
    ChatMessage, ChatResponse, ChatRole, DocumentId, Metadata, MessageId, PendingWrite,
    SimilarityResult, StoreEvent, StoreItem, Tombstone, VectorDocument,
};
pub use services::{
    ChatSession, ChatSessionHandler, ChatStore, FlushHandle, FlushReport, FlushScheduler,
    MismatchPolicy, SessionCounterRegistry, VectorStore,
};
pub use storage::{PersistenceSink, PrimaryStore, WriteBehindQueue, WriteBehindStore};

/// Error type for stowaway operations.
///
/// # Error Variant Triggers
///
/// | Variant | Raised When |
/// |---------|-------------|
/// | `InvalidInput` | Empty query vectors, malformed payloads, bad config values |
/// | `DimensionMismatch` | A similarity query meets a stored vector of another length |
/// | `SessionNotFound` | Incrementing a counter that was never opened or already closed |
/// | `PersistenceFailed` | A persistence sink rejects a write or delete |
/// | `OperationFailed` | I/O, config parsing, observability initialization |
#[derive(Debug, ThisError)]
pub enum Error {
    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Vectors of unequal length were compared.
    ///
    /// Raised by similarity search under [`MismatchPolicy::FailFast`].
    #[error("dimension mismatch for '{id}': expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The stored item whose vector did not match.
        id: String,
        /// Query vector length.
        expected: usize,
        /// Stored vector length.
        actual: usize,
    },

    /// No counter is registered for the session.
    #[error("session not found: {session_id}")]
    SessionNotFound {
        /// The session identifier.
        session_id: String,
    },

    /// A persistence sink failed to write or delete an item.
    ///
    /// Only ever observed inside the flush task; producers never see it.
    #[error("persistence sink '{sink}' failed for '{id}': {cause}")]
    PersistenceFailed {
        /// Name of the sink.
        sink: String,
        /// The affected item.
        id: String,
        /// The underlying cause.
        cause: String,
    },

    /// An operation failed.
    #[error("operation '{operation}' failed: {cause}")]
    OperationFailed {
        /// The operation that failed.
        operation: String,
        /// The underlying cause.
        cause: String,
    },
}

/// Result type alias for stowaway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Returns the current Unix timestamp in milliseconds.
///
/// Falls back to 0 if the system clock is before the Unix epoch.
#[must_use]
pub fn current_timestamp_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| u64::try_from(d.as_millis()).ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::InvalidInput("test error".to_string());
        assert_eq!(err.to_string(), "invalid input: test error");

        let err = Error::DimensionMismatch {
            id: "doc_1".to_string(),
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "dimension mismatch for 'doc_1': expected 3, got 2"
        );

        let err = Error::SessionNotFound {
            session_id: "abc".to_string(),
        };
        assert_eq!(err.to_string(), "session not found: abc");

        let err = Error::OperationFailed {
            operation: "test".to_string(),
            cause: "failed".to_string(),
        };
        assert_eq!(err.to_string(), "operation 'test' failed: failed");
    }

    #[test]
    fn test_current_timestamp_is_recent() {
        // 2020-01-01 in millis
        assert!(current_timestamp_millis() > 1_577_836_800_000);
    }
}
