//! Control-plane reconciliation loop.
//!
//! Converges the set of running stream workers onto the `config` table.
//! Every `reload_every` the whole table is read and diffed against the
//! in-memory run map:
//!
//! - unknown `run_id` → sign and spawn a worker
//! - changed filter → cancel the old worker, spawn a replacement
//! - worker exited cleanly (upstream EOF) → respawn
//! - worker exited with a terminal rejection → leave the slot dormant until
//!   the row changes or disappears (prevents hammering the upstream with
//!   known-bad credentials)
//! - `run_id` gone from the table → cancel and forget
//!
//! Cancellation is a task abort: fire-and-forget, observed by the worker at
//! its next await point.  A failed table read abandons the tick without
//! touching the running set.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db;
use crate::oauth;
use crate::queue::Event;
use crate::stream::{self, StreamError, StreamJob};
use crate::subscription::Subscription;

/// In-memory record for one live subscription.  `worker` is `None` once a
/// terminal upstream rejection has been reaped; the fingerprint keeps change
/// detection working while the slot is dormant.
struct Run {
    fingerprint: String,
    worker: Option<JoinHandle<Result<(), StreamError>>>,
}

pub struct Reconciler {
    pool: PgPool,
    client: reqwest::Client,
    queue: UnboundedSender<Event>,
    endpoint: String,
    reload_every: Duration,
    runs: HashMap<String, Run>,
}

impl Reconciler {
    pub fn new(
        pool: PgPool,
        client: reqwest::Client,
        queue: UnboundedSender<Event>,
        endpoint: String,
        reload_every: Duration,
    ) -> Self {
        Self {
            pool,
            client,
            queue,
            endpoint,
            reload_every,
            runs: HashMap::new(),
        }
    }

    /// Run the reconciliation loop forever.
    pub async fn run(mut self) {
        let mut table_ready = false;
        loop {
            if !table_ready {
                match db::ensure_config_table(&self.pool).await {
                    Ok(()) => table_ready = true,
                    Err(e) => error!(error = %e, "failed to create config table, will retry"),
                }
            }
            if table_ready {
                match db::fetch_subscriptions(&self.pool).await {
                    Ok(rows) => self.apply(rows).await,
                    Err(e) => {
                        error!(error = %e, "config reload failed, keeping current workers");
                    }
                }
            }
            tokio::time::sleep(self.reload_every).await;
        }
    }

    /// One reconciliation pass over a snapshot of the `config` table.
    pub async fn apply(&mut self, rows: Vec<(String, serde_json::Value)>) {
        let mut desired = HashSet::with_capacity(rows.len());
        for (run_id, raw) in rows {
            desired.insert(run_id.clone());

            let sub: Subscription = match serde_json::from_value(raw) {
                Ok(sub) => sub,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "malformed subscription config");
                    if let Some(run) = self.runs.remove(&run_id) {
                        cancel(run);
                    }
                    continue;
                }
            };
            let fingerprint = sub.filter.encode();

            match self.runs.get_mut(&run_id) {
                None => {
                    info!(run_id = %run_id, "starting worker");
                    let worker =
                        spawn_worker(&self.client, &self.queue, &self.endpoint, &run_id, &sub);
                    self.runs.insert(
                        run_id,
                        Run {
                            fingerprint,
                            worker: Some(worker),
                        },
                    );
                }
                Some(run) if run.fingerprint != fingerprint => {
                    // Cancel before spawning: the old filter must not emit
                    // once its replacement is live.
                    if let Some(worker) = run.worker.take() {
                        worker.abort();
                    }
                    info!(run_id = %run_id, "filter changed, replacing worker");
                    run.fingerprint = fingerprint;
                    run.worker = Some(spawn_worker(
                        &self.client,
                        &self.queue,
                        &self.endpoint,
                        &run_id,
                        &sub,
                    ));
                }
                Some(run) => {
                    let finished = run.worker.as_ref().is_some_and(JoinHandle::is_finished);
                    if !finished {
                        continue; // alive, or already dormant
                    }
                    let Some(worker) = run.worker.take() else {
                        continue;
                    };
                    match worker.await {
                        Ok(Ok(())) => {
                            info!(run_id = %run_id, "worker disconnected, restarting");
                            run.worker = Some(spawn_worker(
                                &self.client,
                                &self.queue,
                                &self.endpoint,
                                &run_id,
                                &sub,
                            ));
                        }
                        Ok(Err(e)) => {
                            error!(run_id = %run_id, error = %e, "worker failed, dormant until reconfigured");
                        }
                        Err(e) => {
                            // Join errors here mean the worker panicked;
                            // supervision policy is to log and restart.
                            error!(run_id = %run_id, error = %e, "worker panicked, restarting");
                            run.worker = Some(spawn_worker(
                                &self.client,
                                &self.queue,
                                &self.endpoint,
                                &run_id,
                                &sub,
                            ));
                        }
                    }
                }
            }
        }

        let gone: Vec<String> = self
            .runs
            .keys()
            .filter(|run_id| !desired.contains(*run_id))
            .cloned()
            .collect();
        for run_id in gone {
            if let Some(run) = self.runs.remove(&run_id) {
                cancel(run);
                info!(run_id = %run_id, "subscription removed, worker cancelled");
            }
        }
    }
}

fn cancel(run: Run) {
    if let Some(worker) = run.worker {
        worker.abort();
    }
}

/// Sign the request and spawn the stream worker task.
fn spawn_worker(
    client: &reqwest::Client,
    queue: &UnboundedSender<Event>,
    endpoint: &str,
    run_id: &str,
    sub: &Subscription,
) -> JoinHandle<Result<(), StreamError>> {
    let body = sub.filter.encode();
    let authorization =
        oauth::authorization_header(&sub.credentials(), "POST", endpoint, &body);
    let job = StreamJob {
        run_id: run_id.to_owned(),
        url: endpoint.to_owned(),
        body,
        authorization,
    };
    tokio::spawn(stream::run(job, client.clone(), queue.clone()))
}
