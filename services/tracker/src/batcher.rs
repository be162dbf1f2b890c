//! Persistence batcher.
//!
//! On a fixed period, drains whatever is currently queued and commits it to
//! `tweets` as one multi-row insert.  Events that arrive while a drain is in
//! progress wait for the next tick, which bounds per-commit work.
//!
//! A failed commit drops the batch: the upstream offers no replay, so
//! re-queueing would only grow the queue while the database is down.  The
//! loss is logged with the row count.

use sqlx::{PgPool, Postgres, QueryBuilder};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{error, info};

use crate::db;
use crate::queue::{ArrivalCounts, Event};

pub struct Batcher {
    pool: PgPool,
    queue: UnboundedReceiver<Event>,
    counts: ArrivalCounts,
    save_every: Duration,
}

impl Batcher {
    pub fn new(
        pool: PgPool,
        queue: UnboundedReceiver<Event>,
        counts: ArrivalCounts,
        save_every: Duration,
    ) -> Self {
        Self {
            pool,
            queue,
            counts,
            save_every,
        }
    }

    /// Run the batcher until the queue closes (all senders dropped).
    pub async fn run(mut self) {
        let mut table_ready = false;
        loop {
            tokio::time::sleep(self.save_every).await;

            if !table_ready {
                match db::ensure_tweets_table(&self.pool).await {
                    Ok(()) => table_ready = true,
                    Err(e) => {
                        error!(error = %e, "failed to create tweets table, will retry");
                        continue;
                    }
                }
            }

            let events = drain_pending(&mut self.queue);
            if events.is_empty() {
                if self.queue.is_closed() {
                    info!("queue closed, batcher stopping");
                    return;
                }
                continue;
            }

            let tick_counts = count_by_run(&events);
            for (run_id, n) in &tick_counts {
                self.counts.record(run_id, *n);
            }

            let mut insert = build_insert(&events);
            match insert.build().execute(&self.pool).await {
                Ok(_) => info!(rows = events.len(), counts = ?tick_counts, "saved batch"),
                Err(e) => {
                    error!(error = %e, rows = events.len(), "commit failed, batch dropped");
                }
            }
        }
    }
}

/// Snapshot the queue length and pop exactly that many events.  Arrivals
/// racing with the drain stay queued for the next tick.
fn drain_pending(queue: &mut UnboundedReceiver<Event>) -> Vec<Event> {
    let pending = queue.len();
    let mut events = Vec::with_capacity(pending);
    for _ in 0..pending {
        match queue.try_recv() {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
    }
    events
}

fn count_by_run(events: &[Event]) -> HashMap<String, u64> {
    let mut counts: HashMap<String, u64> = HashMap::new();
    for event in events {
        *counts.entry(event.run_id.clone()).or_insert(0) += 1;
    }
    counts
}

/// One `INSERT INTO tweets (run, tweet) VALUES ...` statement covering the
/// whole batch.  The payload is bound as text and cast to jsonb server-side,
/// so the line is stored without ever being parsed in-process.
fn build_insert(events: &[Event]) -> QueryBuilder<Postgres> {
    let mut builder: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO tweets (run, tweet) ");
    builder.push_values(events, |mut row, event| {
        row.push_bind(&event.run_id);
        row.push_bind(&event.data);
        row.push_unseparated("::jsonb");
    });
    builder
}
