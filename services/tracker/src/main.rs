// tracker: streams filtered tweets for every configured subscription into
// Postgres.  One process: a reconciler that converges workers onto the
// `config` table, one stream worker per subscription, a batcher draining
// the shared queue into `tweets`, and a periodic arrival counter.

use clap::Parser;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tracker::batcher::Batcher;
use tracker::config::{self, TrackerConfig};
use tracker::counter::Counter;
use tracker::db;
use tracker::logging::RotatingWriter;
use tracker::queue::ArrivalCounts;
use tracker::reconciler::Reconciler;

#[derive(Parser, Debug)]
#[command(name = "tracker", version, about = "Streaming tweet tracker")]
struct Args {
    /// Path to the TOML config file.
    #[arg(long, default_value = "/etc/tracker/tracker.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let cfg = match config::load_config_from_path(&args.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = init_tracing(&cfg) {
        eprintln!("FATAL: failed to open log file: {e}");
        std::process::exit(1);
    }

    info!(version = env!("CARGO_PKG_VERSION"), "tracker starting");

    // The pool connects lazily; an unreachable database surfaces as logged
    // tick errors, not a startup crash.
    let pool = db::connect(&cfg.database);
    let client = reqwest::Client::builder()
        .build()
        .expect("failed to build HTTP client");

    let (queue_tx, queue_rx) = mpsc::unbounded_channel();
    let counts = ArrivalCounts::new();

    tokio::spawn(Batcher::new(pool.clone(), queue_rx, counts.clone(), cfg.save_every).run());
    tokio::spawn(Counter::new(counts, cfg.count_every).run());
    tokio::spawn(
        Reconciler::new(pool, client, queue_tx, cfg.endpoint.clone(), cfg.reload_every).run(),
    );

    info!("started server");
    shutdown_signal().await;
    info!("shut down");
}

/// Route tracing output to stdout, or to the size-rotated log file when one
/// is configured.  `RUST_LOG` overrides the configured level.
fn init_tracing(cfg: &TrackerConfig) -> std::io::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cfg.loglevel.clone()));
    match &cfg.logfile {
        Some(path) => {
            let writer = RotatingWriter::open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
    Ok(())
}

/// Waits for SIGTERM or Ctrl-C (SIGINT) and returns to trigger shutdown.
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { info!("received Ctrl+C, shutting down"); }
        () = terminate => { info!("received SIGTERM, shutting down"); }
    }
}
