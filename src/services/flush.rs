//! Periodic write-behind flushing.
//!
//! A [`FlushScheduler`] drains its queue in bounded batches and hands every
//! pending write to a [`PersistenceSink`]. Sink failures are logged and
//! counted; the failed write is not retried or requeued.
//!
//! # State machine
//!
//! ```text
//! Idle ──tick──▶ Draining ──batch taken──▶ Persisting ──done──▶ Idle
//! ```
//!
//! A tick that finds the scheduler outside `Idle` is skipped.

use crate::config::FlushSettings;
use crate::models::{PendingWrite, StoreItem};
use crate::storage::{PersistenceSink, WriteBehindQueue};
use crate::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

/// Phase of a flush cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FlushState {
    /// Waiting for the next tick.
    Idle = 0,
    /// Taking a batch off the queue.
    Draining = 1,
    /// Handing the batch to the sink.
    Persisting = 2,
}

impl FlushState {
    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Draining,
            2 => Self::Persisting,
            _ => Self::Idle,
        }
    }
}

/// Outcome of one flush cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Writes taken off the queue.
    pub drained: usize,
    /// Upserts the sink accepted.
    pub written: usize,
    /// Deletions the sink accepted.
    pub deleted: usize,
    /// Writes the sink rejected.
    pub failed: usize,
    /// Writes skipped because a later write in the same batch had the
    /// same ID.
    pub superseded: usize,
}

impl FlushReport {
    /// Adds another report's counts to this one.
    pub const fn merge(&mut self, other: Self) {
        self.drained += other.drained;
        self.written += other.written;
        self.deleted += other.deleted;
        self.failed += other.failed;
        self.superseded += other.superseded;
    }
}

/// Drains a write-behind queue into a persistence sink on a timer.
pub struct FlushScheduler<T: StoreItem> {
    queue: Arc<WriteBehindQueue<T>>,
    sink: Arc<dyn PersistenceSink<T>>,
    interval: Duration,
    batch_size: usize,
    flush_on_shutdown: bool,
    state: AtomicU8,
}

impl<T: StoreItem> FlushScheduler<T> {
    /// Creates a scheduler for `queue` writing to `sink`.
    #[must_use]
    pub fn new(
        queue: Arc<WriteBehindQueue<T>>,
        sink: Arc<dyn PersistenceSink<T>>,
        settings: &FlushSettings,
    ) -> Self {
        Self {
            queue,
            sink,
            interval: settings.interval(),
            batch_size: settings.batch_size,
            flush_on_shutdown: settings.flush_on_shutdown,
            state: AtomicU8::new(FlushState::Idle as u8),
        }
    }

    /// Current phase.
    #[must_use]
    pub fn state(&self) -> FlushState {
        FlushState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Time between ticks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Maximum writes handled per cycle.
    #[must_use]
    pub const fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Runs one flush cycle.
    ///
    /// Returns `None` without touching the queue if another cycle is in
    /// progress.
    pub async fn flush_once(&self) -> Option<FlushReport> {
        self.run_cycle(self.batch_size).await
    }

    #[instrument(skip(self), fields(kind = T::KIND, sink = self.sink.name()))]
    async fn run_cycle(&self, max: usize) -> Option<FlushReport> {
        let Some(guard) = StateGuard::acquire(&self.state) else {
            metrics::counter!("flush_ticks_skipped_total", "kind" => T::KIND).increment(1);
            tracing::debug!("Flush already in progress, skipping tick");
            return None;
        };

        let batch = self.queue.drain(max.min(self.batch_size));
        let mut report = FlushReport {
            drained: batch.len(),
            ..FlushReport::default()
        };
        if batch.is_empty() {
            return Some(report);
        }

        guard.advance(FlushState::Persisting);
        let latest = latest_per_id(&batch);
        for (write, is_latest) in batch.iter().zip(latest) {
            if !is_latest {
                report.superseded += 1;
                metrics::counter!("flush_items_total", "kind" => T::KIND, "outcome" => "superseded")
                    .increment(1);
                continue;
            }
            let (outcome, result) = match write {
                PendingWrite::Upsert(item) => ("written", self.sink.write_item(item).await),
                PendingWrite::Tombstone(tombstone) => {
                    ("deleted", self.sink.delete_item(tombstone).await)
                },
            };
            match result {
                Ok(()) if write.is_tombstone() => report.deleted += 1,
                Ok(()) => report.written += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(id = %write.id(), error = %e, "Failed to persist item");
                    metrics::counter!("flush_items_total", "kind" => T::KIND, "outcome" => "failed")
                        .increment(1);
                    continue;
                },
            }
            metrics::counter!("flush_items_total", "kind" => T::KIND, "outcome" => outcome)
                .increment(1);
        }

        tracing::debug!(
            drained = report.drained,
            written = report.written,
            deleted = report.deleted,
            failed = report.failed,
            superseded = report.superseded,
            "Flushed batch"
        );
        Some(report)
    }

    /// Flushes the writes queued when the call starts, one batch per
    /// cycle.
    ///
    /// Writes enqueued meanwhile are left for later, so busy producers
    /// cannot keep it running. Stops early if the queue runs dry or a cycle
    /// is skipped.
    pub async fn flush_all(&self) -> FlushReport {
        let mut remaining = self.queue.len();
        let mut total = FlushReport::default();
        while remaining > 0 {
            let Some(report) = self.run_cycle(remaining).await else {
                break;
            };
            total.merge(report);
            if report.drained == 0 {
                break;
            }
            remaining = remaining.saturating_sub(report.drained);
        }
        total
    }

    /// Starts flushing on a timer in a background task.
    ///
    /// The first cycle runs one interval after spawning. Dropping the
    /// returned handle stops the timer the same way as
    /// [`FlushHandle::shutdown`], but nothing waits for the task.
    #[must_use]
    pub fn spawn(self: Arc<Self>) -> FlushHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = self;

        tracing::info!(
            kind = T::KIND,
            sink = scheduler.sink.name(),
            interval_ms = u64::try_from(scheduler.interval.as_millis()).unwrap_or(u64::MAX),
            batch_size = scheduler.batch_size,
            "Starting flush scheduler"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    },
                    _ = ticker.tick() => {
                        scheduler.flush_once().await;
                    },
                }
            }

            let report = if scheduler.flush_on_shutdown {
                scheduler.flush_all().await
            } else {
                FlushReport::default()
            };
            tracing::info!(
                kind = T::KIND,
                drained = report.drained,
                left_behind = scheduler.queue.len(),
                "Flush scheduler stopped"
            );
            report
        });

        FlushHandle {
            shutdown: shutdown_tx,
            task,
        }
    }
}

impl<T: StoreItem> fmt::Debug for FlushScheduler<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlushScheduler")
            .field("kind", &T::KIND)
            .field("sink", &self.sink.name())
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Flags the last write for each ID in `batch`.
///
/// Earlier writes to the same ID are superseded, so a put followed by a
/// delete in one batch reaches the sink as a single delete.
fn latest_per_id<T: StoreItem>(batch: &[PendingWrite<T>]) -> Vec<bool> {
    let mut last = HashMap::with_capacity(batch.len());
    for (index, write) in batch.iter().enumerate() {
        last.insert(write.id(), index);
    }
    batch
        .iter()
        .enumerate()
        .map(|(index, write)| last.get(write.id()) == Some(&index))
        .collect()
}

/// Handle to a running flush task.
#[derive(Debug)]
pub struct FlushHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<FlushReport>,
}

impl FlushHandle {
    /// Stops the timer, runs the final flush if enabled, and waits for the
    /// task to finish.
    ///
    /// Returns what the final flush persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush task panicked or was cancelled.
    pub async fn shutdown(self) -> Result<FlushReport> {
        // The task may already be gone; joining reports that.
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|e| Error::OperationFailed {
            operation: "flush_shutdown".to_string(),
            cause: e.to_string(),
        })
    }

    /// Returns true if the flush task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Claims the scheduler for one cycle and returns it to `Idle` on drop.
struct StateGuard<'a> {
    state: &'a AtomicU8,
}

impl<'a> StateGuard<'a> {
    fn acquire(state: &'a AtomicU8) -> Option<Self> {
        state
            .compare_exchange(
                FlushState::Idle as u8,
                FlushState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .ok()
            .map(|_| Self { state })
    }

    fn advance(&self, next: FlushState) {
        self.state.store(next as u8, Ordering::Release);
    }
}

impl Drop for StateGuard<'_> {
    fn drop(&mut self) {
        self.state.store(FlushState::Idle as u8, Ordering::Release);
    }
}
