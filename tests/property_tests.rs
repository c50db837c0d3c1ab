//! Property-based tests for store invariants.
//!
//! Uses proptest to verify invariants across random inputs:
//! - Queue draining yields ceil(N/B) FIFO batches
//! - The primary store is last-write-wins per ID
//! - Cosine similarity stays in [-1, 1] and is 1 for a vector with itself
//! - Search results are sorted, bounded by `top_k`, and above `min_score`

// Property tests use expect/unwrap for simplicity - panics are acceptable in tests
#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use stowaway::models::{DocumentId, Metadata, PendingWrite, VectorDocument};
use stowaway::config::FlushSettings;
use stowaway::services::{FlushScheduler, MismatchPolicy, cosine_similarity, search};
use stowaway::storage::MemorySink;
use stowaway::{PrimaryStore, WriteBehindQueue, WriteBehindStore};

fn document(id: u64, embedding: Vec<f32>) -> VectorDocument {
    VectorDocument {
        id: DocumentId::from_sequence(id),
        content: format!("content {id}"),
        embedding,
        metadata: Metadata::new(),
        timestamp: chrono::Utc::now(),
    }
}

fn non_zero_vector(dims: usize) -> impl Strategy<Value = Vec<f32>> {
    prop::collection::vec(-100.0_f32..100.0, dims)
        .prop_filter("non-zero norm", |v| v.iter().any(|x| x.abs() > 1e-3))
}

#[derive(Debug, Clone)]
enum Op {
    Put(u64, u32),
    Delete(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0_u64..8, any::<u32>()).prop_map(|(id, tag)| Op::Put(id, tag)),
        (0_u64..8).prop_map(Op::Delete),
    ]
}

// ============================================================================
// Write-behind queue
// ============================================================================

proptest! {
    /// Property: draining N writes with ceiling B takes ceil(N/B) batches in
    /// enqueue order, all full except possibly the last.
    #[test]
    fn prop_drain_batches(n in 0_u64..300, batch in 1_usize..64) {
        let queue = WriteBehindQueue::<VectorDocument>::new();
        for id in 1..=n {
            queue.enqueue(PendingWrite::Upsert(Arc::new(document(id, vec![1.0]))));
        }

        let mut batches = Vec::new();
        loop {
            let drained = queue.drain(batch);
            if drained.is_empty() {
                break;
            }
            batches.push(drained);
        }

        let n_usize = usize::try_from(n).unwrap();
        prop_assert_eq!(batches.len(), n_usize.div_ceil(batch));
        if let Some((last, full)) = batches.split_last() {
            prop_assert!(full.iter().all(|b| b.len() == batch));
            prop_assert!(!last.is_empty() && last.len() <= batch);
        }

        let order: Vec<_> = batches.iter().flatten().map(|w| w.id().clone()).collect();
        let expected: Vec<_> = (1..=n).map(DocumentId::from_sequence).collect();
        prop_assert_eq!(order, expected);
    }

    /// Property: queue counters agree with what was enqueued and drained.
    #[test]
    fn prop_queue_counters(n in 0_u64..100, batch in 1_usize..20) {
        let queue = WriteBehindQueue::<VectorDocument>::new();
        for id in 1..=n {
            queue.enqueue(PendingWrite::Upsert(Arc::new(document(id, vec![1.0]))));
        }
        let first = queue.drain(batch).len();

        prop_assert_eq!(queue.total_enqueued(), n);
        prop_assert_eq!(queue.total_drained(), first as u64);
        prop_assert_eq!(queue.len() + first, usize::try_from(n).unwrap());
    }

    /// Property: repeated flush cycles persist every write, one bounded
    /// batch per cycle.
    #[test]
    fn prop_flush_cycles(n in 0_usize..120, batch in 1_usize..25) {
        let store = WriteBehindStore::<VectorDocument>::new();
        let sink = Arc::new(MemorySink::<VectorDocument>::new());
        let scheduler = FlushScheduler::new(
            store.queue(),
            sink.clone(),
            &FlushSettings {
                interval_ms: 1_000,
                batch_size: batch,
                flush_on_shutdown: true,
            },
        );
        for _ in 0..n {
            let id = store.next_sequence();
            store.put(document(id, vec![1.0]));
        }

        let cycles = tokio_test::block_on(async {
            let mut cycles = 0;
            while let Some(report) = scheduler.flush_once().await {
                if report.drained == 0 {
                    break;
                }
                assert!(report.drained <= batch);
                cycles += 1;
            }
            cycles
        });

        prop_assert_eq!(cycles, n.div_ceil(batch));
        prop_assert_eq!(sink.write_count(), n);
    }
}

// ============================================================================
// Primary store
// ============================================================================

proptest! {
    /// Property: after any put/delete sequence, each ID holds the effect of
    /// its last operation.
    #[test]
    fn prop_last_write_wins(ops in prop::collection::vec(op(), 0..64)) {
        let store = PrimaryStore::<VectorDocument>::new();
        let mut model: HashMap<u64, u32> = HashMap::new();

        for op in &ops {
            match *op {
                Op::Put(id, tag) => {
                    let mut doc = document(id, vec![1.0]);
                    doc.content = tag.to_string();
                    store.put(Arc::new(doc));
                    model.insert(id, tag);
                },
                Op::Delete(id) => {
                    let removed = store.remove(&DocumentId::from_sequence(id)).is_some();
                    prop_assert_eq!(removed, model.remove(&id).is_some());
                },
            }
        }

        prop_assert_eq!(store.len(), model.len());
        for id in 0..8 {
            let got = store.get(&DocumentId::from_sequence(id)).map(|d| d.content.clone());
            prop_assert_eq!(got, model.get(&id).map(ToString::to_string));
        }
    }

    /// Property: every write is readable before anything is flushed.
    #[test]
    fn prop_read_your_write(count in 1_usize..50) {
        let store = WriteBehindStore::<VectorDocument>::new();
        for _ in 0..count {
            let id = store.next_sequence();
            let stored = store.put(document(id, vec![1.0]));
            prop_assert_eq!(store.get(&stored.id), Some(stored));
        }
        prop_assert_eq!(store.queue().len(), count);
    }
}

// ============================================================================
// Similarity
// ============================================================================

proptest! {
    /// Property: cosine similarity is bounded and symmetric.
    #[test]
    fn prop_cosine_bounded(
        (a, b) in (1_usize..16).prop_flat_map(|d| (non_zero_vector(d), non_zero_vector(d)))
    ) {
        let ab = cosine_similarity(&a, &b);
        let ba = cosine_similarity(&b, &a);
        prop_assert!((-1.0 - 1e-5..=1.0 + 1e-5).contains(&ab));
        prop_assert!((ab - ba).abs() < 1e-5);
    }

    /// Property: a vector is maximally similar to itself.
    #[test]
    fn prop_self_similarity(v in (1_usize..32).prop_flat_map(non_zero_vector)) {
        prop_assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-4);
    }

    /// Property: search output is sorted, bounded by top_k and above
    /// min_score.
    #[test]
    fn prop_search_shape(
        vectors in prop::collection::vec(non_zero_vector(4), 0..40),
        query in non_zero_vector(4),
        top_k in 0_usize..10,
        min_score in -1.0_f32..1.0,
    ) {
        let docs: Vec<_> = vectors
            .into_iter()
            .enumerate()
            .map(|(i, v)| Arc::new(document(i as u64 + 1, v)))
            .collect();

        let results = search(&docs, &query, top_k, min_score, MismatchPolicy::FailFast).unwrap();

        prop_assert!(results.len() <= top_k);
        prop_assert!(results.iter().all(|r| r.score >= min_score));
        prop_assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    /// Property: a score above 1 matches nothing.
    #[test]
    fn prop_impossible_threshold(vectors in prop::collection::vec(non_zero_vector(3), 1..20)) {
        let docs: Vec<_> = vectors
            .iter()
            .enumerate()
            .map(|(i, v)| Arc::new(document(i as u64 + 1, v.clone())))
            .collect();

        let results = search(&docs, &vectors[0], 100, 1.1, MismatchPolicy::FailFast).unwrap();
        prop_assert!(results.is_empty());
    }
}
