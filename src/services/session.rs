//! Per-connection message counters.
//!
//! A counter exists from `on_connect` until `on_close`. Increments for one
//! session are linearizable; different sessions never contend on the same
//! lock.

use crate::{Error, Result};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Registry of live session counters.
#[derive(Debug, Default)]
pub struct SessionCounterRegistry {
    counters: DashMap<String, AtomicU64>,
}

impl SessionCounterRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session with a zero counter.
    ///
    /// Calling this for an already-open session leaves its count untouched.
    pub fn on_connect(&self, session_id: &str) {
        self.counters
            .entry(session_id.to_string())
            .or_insert_with(|| AtomicU64::new(0));
        self.report();
    }

    /// Increments a session's counter and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionNotFound`] if the session is not open.
    pub fn increment(&self, session_id: &str) -> Result<u64> {
        let counter = self
            .counters
            .get(session_id)
            .ok_or_else(|| Error::SessionNotFound {
                session_id: session_id.to_string(),
            })?;
        Ok(counter.fetch_add(1, Ordering::AcqRel) + 1)
    }

    /// Returns a session's current count.
    #[must_use]
    pub fn current(&self, session_id: &str) -> Option<u64> {
        self.counters
            .get(session_id)
            .map(|counter| counter.load(Ordering::Acquire))
    }

    /// Removes a session's counter. Returns whether it existed.
    pub fn on_close(&self, session_id: &str) -> bool {
        let existed = self.counters.remove(session_id).is_some();
        self.report();
        existed
    }

    /// Number of open sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Returns true if no sessions are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn report(&self) {
        #[allow(clippy::cast_precision_loss)]
        metrics::gauge!("session_counters_active").set(self.counters.len() as f64);
    }
}
