//! Shared in-process types: the queue event and the arrival counter.
//!
//! The queue itself is a `tokio::sync::mpsc` unbounded channel created at
//! startup — stream workers hold the sender, the batcher owns the receiver.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

/// One line received from the upstream, tagged with the subscription that
/// produced it.  The payload is the raw JSON text with the trailing newline
/// stripped; it is never parsed in-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub run_id: String,
    pub data: String,
}

/// Process-wide per-subscription arrival counts.
///
/// The batcher merges each tick's counts in; the counter task periodically
/// takes the whole map and resets it.  Cloning shares the underlying map.
#[derive(Debug, Clone, Default)]
pub struct ArrivalCounts {
    inner: Arc<Mutex<HashMap<String, u64>>>,
}

impl ArrivalCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `n` arrivals for `run_id`.
    pub fn record(&self, run_id: &str, n: u64) {
        let mut counts = self.lock();
        *counts.entry(run_id.to_owned()).or_insert(0) += n;
    }

    /// Take the accumulated counts, leaving the map empty.
    pub fn take(&self) -> HashMap<String, u64> {
        std::mem::take(&mut *self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        // A poisoned lock only means another thread panicked mid-update;
        // the map itself is still usable.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
