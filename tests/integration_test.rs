//! End-to-end tests for the chat and vector stores with their flushers.

// Integration tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;
use stowaway::config::FlushSettings;
use stowaway::models::{
    ChatMessage, ChatRole, DELETED_FLAG, DocumentId, Metadata, ResponseKind, VectorDocument,
};
use stowaway::services::FlushScheduler;
use stowaway::storage::{FilesystemSink, MemorySink, SinkCall};
use stowaway::{
    ChatSessionHandler, ChatStore, Error, MismatchPolicy, StowawayConfig, VectorStore,
    WriteBehindStore,
};
use tempfile::TempDir;

fn flush_settings(interval_ms: u64, batch_size: usize) -> FlushSettings {
    FlushSettings {
        interval_ms,
        batch_size,
        flush_on_shutdown: true,
    }
}

fn vector_store() -> VectorStore {
    VectorStore::new(&StowawayConfig::default().vector)
}

// ============================================================================
// Vector store
// ============================================================================

#[test]
fn test_vector_ranking_scenario() {
    let store = vector_store();
    store.store_document("x", vec![1.0, 0.0], Metadata::new());
    store.store_document("y", vec![0.0, 1.0], Metadata::new());
    store.store_document("xy", vec![1.0, 1.0], Metadata::new());

    let results = store.similarity_search(&[1.0, 0.0], 2, 0.0).unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].document.id, DocumentId::new("doc_1"));
    assert!((results[0].score - 1.0).abs() < 1e-6);
    assert_eq!(results[1].document.id, DocumentId::new("doc_3"));
    assert!((results[1].score - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-4);
}

#[test]
fn test_min_score_above_one_returns_nothing() {
    let store = vector_store();
    let doc = store.store_document("x", vec![0.5, 0.5, 0.5], Metadata::new());

    let results = store.similarity_search(&doc.embedding, 10, 1.1).unwrap();
    assert!(results.is_empty());
}

#[test]
fn test_mismatch_policies() {
    let store = vector_store();
    store.store_document("3d", vec![1.0, 0.0, 0.0], Metadata::new());
    store.store_document("2d", vec![1.0, 0.0], Metadata::new());

    let err = store.similarity_search(&[1.0, 0.0], 10, 0.0).unwrap_err();
    assert!(matches!(
        err,
        Error::DimensionMismatch {
            expected: 2,
            actual: 3,
            ..
        }
    ));

    let results = store
        .similarity_search_with(&[1.0, 0.0], 10, 0.0, MismatchPolicy::Skip)
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].document.content, "2d");
}

#[test]
fn test_empty_query_is_rejected() {
    let store = vector_store();
    store.store_document("x", vec![1.0], Metadata::new());
    assert!(matches!(
        store.similarity_search(&[], 10, 0.0),
        Err(Error::InvalidInput(_))
    ));
}

// ============================================================================
// Write-behind semantics
// ============================================================================

#[test]
fn test_read_your_write_before_flush() {
    let store = ChatStore::new(&StowawayConfig::default().chat);
    let message = store.store_message("s1", "hello", ChatRole::User);

    let fetched = store.get_message(message.id).expect("visible immediately");
    assert_eq!(fetched.content, "hello");
    assert_eq!(store.store().queue().len(), 1);
}

#[tokio::test]
async fn test_delete_before_flush_persists_only_the_delete() {
    let store = vector_store();
    let sink = Arc::new(MemorySink::<VectorDocument>::new());
    let scheduler = FlushScheduler::new(
        store.store().queue(),
        sink.clone(),
        &flush_settings(1000, 100),
    );

    let doc = store.store_document("x", vec![1.0], Metadata::new());
    store.delete_document(&doc.id);
    let report = scheduler.flush_all().await;

    assert_eq!(report.drained, 2);
    assert_eq!(report.superseded, 1);
    assert_eq!(sink.calls(), vec![SinkCall::Delete(doc.id.clone())]);
    assert_eq!(sink.write_count(), 0);
    assert!(!sink.is_persisted(&doc.id));
    assert!(store.get_document(&doc.id).is_none());
    let record = sink.deletion_record(&doc.id).expect("deletion record");
    assert_eq!(record.get(DELETED_FLAG), Some(&serde_json::Value::Bool(true)));
}

#[tokio::test]
async fn test_delete_of_unknown_id_is_a_noop() {
    let store = WriteBehindStore::<VectorDocument>::new();
    let sink = Arc::new(MemorySink::<VectorDocument>::new());
    let scheduler = FlushScheduler::new(store.queue(), sink.clone(), &flush_settings(1000, 100));

    assert!(!store.delete(&DocumentId::new("doc_404")));
    let report = scheduler.flush_all().await;

    assert_eq!(report.drained, 0);
    assert!(sink.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_flusher_persists_in_bounded_batches() {
    let mut settings = StowawayConfig::default().vector;
    settings.flush = flush_settings(100, 3);
    let store = VectorStore::new(&settings);
    let sink = Arc::new(MemorySink::<VectorDocument>::new());
    let handle = store.spawn_flusher(sink.clone());

    for i in 0..7 {
        store.store_document(format!("doc {i}"), vec![1.0], Metadata::new());
    }

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(sink.write_count(), 3);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.write_count(), 6);

    let report = handle.shutdown().await.unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(sink.persisted_len(), 7);
    assert!(store.store().queue().is_empty());
}

#[tokio::test]
async fn test_sink_failures_do_not_stop_the_batch() {
    let store = vector_store();
    let sink = Arc::new(MemorySink::<VectorDocument>::new());
    let scheduler = store.flusher(sink.clone());

    let a = store.store_document("a", vec![1.0], Metadata::new());
    let b = store.store_document("b", vec![1.0], Metadata::new());
    sink.fail_on(a.id.clone());

    let report = scheduler.flush_all().await;
    assert_eq!(report.failed, 1);
    assert_eq!(report.written, 1);
    assert!(!sink.is_persisted(&a.id));
    assert!(sink.is_persisted(&b.id));
    // The failed write is dropped, not retried.
    assert!(store.store().queue().is_empty());
}

// ============================================================================
// Chat sessions
// ============================================================================

#[test]
fn test_session_counts_and_replies() {
    let handler = ChatSessionHandler::new(ChatStore::new(&StowawayConfig::default().chat));
    let session = handler.connect_with_id("session-a");

    for k in 1..=4 {
        let response = session.process(&format!(r#"{{"content": "msg {k}"}}"#));
        assert_eq!(response.kind, ResponseKind::Response);
        assert_eq!(response.message_count, k);
        assert_eq!(response.content, format!("Message received: \"msg {k}\""));
    }
    assert_eq!(handler.counters().current("session-a"), Some(4));
    assert_eq!(handler.store().len(), 4);
}

#[test]
fn test_closed_session_counter_is_gone() {
    let handler = ChatSessionHandler::new(ChatStore::new(&StowawayConfig::default().chat));
    let session = handler.connect_with_id("session-b");
    session.process(r#"{"content": "hi"}"#);
    session.close();

    assert_eq!(handler.counters().current("session-b"), None);
    assert!(matches!(
        handler.counters().increment("session-b"),
        Err(Error::SessionNotFound { .. })
    ));
    // Stored messages outlive the session.
    assert_eq!(handler.store().len(), 1);
}

#[test]
fn test_voice_message_reply() {
    let handler = ChatSessionHandler::new(ChatStore::new(&StowawayConfig::default().chat));
    let session = handler.connect();
    let response = session.process(
        r#"{"content": "listen", "type": "voice", "audio": {"mimeType": "audio/webm", "size": 2048, "data": "QUJDRA=="}}"#,
    );

    assert!(response.has_audio);
    assert_eq!(
        response.content,
        "Voice message received: \"listen\" [Audio: audio/webm, 2048 bytes, 8 chars base64]"
    );
}

#[tokio::test]
async fn test_session_subscription_sees_history_then_live() {
    let store = ChatStore::new(&StowawayConfig::default().chat);
    store.store_message("a", "first", ChatRole::User);
    store.store_message("b", "other", ChatRole::User);

    let mut subscription = store.session_messages("a");
    store.store_message("a", "second", ChatRole::Assistant);
    store.store_message("b", "other again", ChatRole::User);

    let first = subscription.recv().await.unwrap();
    let second = subscription.recv().await.unwrap();
    assert_eq!(first.item().unwrap().content, "first");
    assert_eq!(second.item().unwrap().content, "second");
    assert!(subscription.try_recv().is_none());
}

// ============================================================================
// Filesystem sink
// ============================================================================

#[tokio::test]
async fn test_filesystem_sink_end_to_end() {
    let dir = TempDir::new().unwrap();
    let store = ChatStore::new(&StowawayConfig::default().chat);
    let sink = Arc::new(
        FilesystemSink::<ChatMessage>::with_create(dir.path().join("messages"))
            .await
            .unwrap(),
    );
    let scheduler = store.flusher(sink.clone());

    let kept = store.store_message("s", "keep me", ChatRole::User);
    let dropped = store.store_message("s", "drop me", ChatRole::User);
    scheduler.flush_all().await;
    store.delete_message(dropped.id);
    scheduler.flush_all().await;

    let loaded = sink.load(&kept.id).await.unwrap().expect("persisted");
    assert_eq!(loaded, *kept);
    assert!(sink.load(&dropped.id).await.unwrap().is_none());
}
