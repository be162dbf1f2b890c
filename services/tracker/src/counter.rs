//! Periodic arrival-count reporter.
//!
//! Advisory only: reads the shared counter, logs the totals, and resets it.
//! A lost tick loses nothing but a log line.

use std::collections::BTreeMap;
use std::time::Duration;
use tracing::info;

use crate::queue::ArrivalCounts;

pub struct Counter {
    counts: ArrivalCounts,
    count_every: Duration,
}

impl Counter {
    pub fn new(counts: ArrivalCounts, count_every: Duration) -> Self {
        Self { counts, count_every }
    }

    pub async fn run(self) {
        loop {
            tokio::time::sleep(self.count_every).await;
            let totals = self.counts.take();
            if totals.is_empty() {
                continue;
            }
            // Sorted for stable log output.
            let totals: BTreeMap<String, u64> = totals.into_iter().collect();
            info!(arrivals = ?totals, "arrival counts");
        }
    }
}
