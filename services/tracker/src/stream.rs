//! Per-subscription stream worker.
//!
//! Opens one long-lived streaming POST against the upstream filter endpoint
//! and pushes every non-blank body line onto the shared queue, tagged with
//! the subscription's `run_id`.  Runs until cancelled (task abort), clean
//! EOF, or a terminal upstream rejection.
//!
//! # Reconnection
//! Recoverable statuses (420, 429, 5xx) and transport faults back off
//! exponentially: 60 s base after a 420, 5 s otherwise, doubling up to
//! [`MAX_BACKOFF_SECS`].  A successful connect resets the backoff.  Any
//! other non-200 status is terminal; the reconciler decides what happens to
//! the subscription afterwards.

use futures_util::TryStreamExt;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::io::StreamReader;
use tracing::{debug, error, info, warn};

use crate::queue::Event;

/// Upstream status code for "rate limited" (pre-dates 429).
const ENHANCE_YOUR_CALM: u16 = 420;

/// Upper bound on the reconnect backoff.  The upstream never declares one;
/// 320 s is the last doubling step reachable from the 5 s base.
const MAX_BACKOFF_SECS: u64 = 320;

/// Terminal worker failure, reported to the reconciler via the join handle.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("upstream rejected subscription: HTTP {status}: {body}")]
    Rejected { status: StatusCode, body: String },
}

/// Everything a worker needs for its connection, assembled by the
/// reconciler at spawn time.  The authorization header is signed once, here,
/// and reused verbatim across reconnect attempts.
#[derive(Debug, Clone)]
pub struct StreamJob {
    pub run_id: String,
    pub url: String,
    pub body: String,
    pub authorization: String,
}

enum StreamEnd {
    Eof,
    QueueClosed,
}

/// Run one stream worker to completion.
pub async fn run(
    job: StreamJob,
    client: reqwest::Client,
    queue: UnboundedSender<Event>,
) -> Result<(), StreamError> {
    let mut backoff: u64 = 0;
    loop {
        let response = match client
            .post(&job.url)
            .header(AUTHORIZATION, &job.authorization)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(job.body.clone())
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                backoff = next_backoff(backoff, false);
                warn!(run_id = %job.run_id, error = %e, backoff_s = backoff, "connect failed, retrying");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
                continue;
            }
        };

        let status = response.status();
        if recoverable(status) {
            backoff = next_backoff(backoff, status.as_u16() == ENHANCE_YOUR_CALM);
            let body = response.text().await.unwrap_or_default();
            warn!(run_id = %job.run_id, %status, backoff_s = backoff, body = %body, "upstream error, backing off");
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            continue;
        }
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            error!(run_id = %job.run_id, %status, body = %body, "upstream rejected subscription");
            return Err(StreamError::Rejected { status, body });
        }

        backoff = 0;
        info!(run_id = %job.run_id, "connected");
        match forward_lines(response, &job.run_id, &queue).await {
            Ok(StreamEnd::Eof) => {
                info!(run_id = %job.run_id, "disconnect");
                return Ok(());
            }
            Ok(StreamEnd::QueueClosed) => {
                info!(run_id = %job.run_id, "queue closed, stopping");
                return Ok(());
            }
            Err(e) => {
                backoff = next_backoff(backoff, false);
                warn!(run_id = %job.run_id, error = %e, backoff_s = backoff, "stream read failed, reconnecting");
                tokio::time::sleep(Duration::from_secs(backoff)).await;
            }
        }
    }
}

/// Forward body lines into the queue until EOF or a read error.
///
/// Blank lines are upstream keep-alives and are dropped without enqueueing.
/// The line text is never JSON-parsed here; the batcher persists it raw.
async fn forward_lines(
    response: reqwest::Response,
    run_id: &str,
    queue: &UnboundedSender<Event>,
) -> std::io::Result<StreamEnd> {
    let body = StreamReader::new(response.bytes_stream().map_err(std::io::Error::other));
    let mut lines = body.lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            debug!(run_id, "keep-alive");
            continue;
        }
        let event = Event {
            run_id: run_id.to_owned(),
            data: line,
        };
        if queue.send(event).is_err() {
            return Ok(StreamEnd::QueueClosed);
        }
    }
    Ok(StreamEnd::Eof)
}

fn recoverable(status: StatusCode) -> bool {
    status.as_u16() == ENHANCE_YOUR_CALM
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

/// Next backoff in seconds.  Zero means "fresh": the first failure starts at
/// 60 s when rate limited, 5 s otherwise; afterwards each step doubles.
fn next_backoff(previous: u64, rate_limited: bool) -> u64 {
    if previous == 0 {
        if rate_limited { 60 } else { 5 }
    } else {
        (previous * 2).min(MAX_BACKOFF_SECS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_error_backoff_doubles_from_five() {
        let mut backoff = 0;
        let mut seen = Vec::new();
        for _ in 0..8 {
            backoff = next_backoff(backoff, false);
            seen.push(backoff);
        }
        assert_eq!(seen, vec![5, 10, 20, 40, 80, 160, 320, 320]);
    }

    #[test]
    fn rate_limit_backoff_doubles_from_sixty() {
        let mut backoff = 0;
        let mut seen = Vec::new();
        for _ in 0..4 {
            backoff = next_backoff(backoff, true);
            seen.push(backoff);
        }
        assert_eq!(seen, vec![60, 120, 240, 320]);
    }

    #[test]
    fn rate_limit_base_applies_only_when_fresh() {
        // A 420 following an earlier failure doubles; it does not reset to 60.
        assert_eq!(next_backoff(5, true), 10);
    }

    #[test]
    fn recoverable_statuses() {
        assert!(recoverable(StatusCode::from_u16(420).unwrap()));
        assert!(recoverable(StatusCode::TOO_MANY_REQUESTS));
        assert!(recoverable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(recoverable(StatusCode::SERVICE_UNAVAILABLE));
        assert!(!recoverable(StatusCode::NOT_FOUND));
        assert!(!recoverable(StatusCode::UNAUTHORIZED));
        assert!(!recoverable(StatusCode::OK));
    }
}
