//! Postgres pool construction and the two fixed tables.
//!
//! Table names are fixed identifiers; values always travel as bound
//! parameters.  Each table is created by the component that owns it on its
//! first tick, so a fresh database needs no out-of-band migration.

use sqlx::PgPool;
use sqlx::Row;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};

use crate::config::DatabaseConfig;

/// Build a lazily-connecting pool.  Nothing touches the network here; the
/// first component tick surfaces connection problems as ordinary tick
/// errors, which are logged and retried.
pub fn connect(cfg: &DatabaseConfig) -> PgPool {
    let options = PgConnectOptions::new()
        .host(&cfg.host)
        .username(&cfg.user)
        .password(&cfg.password)
        .database(&cfg.name);
    PgPoolOptions::new()
        .max_connections(10)
        .connect_lazy_with(options)
}

/// `config`: one row per subscription, keyed by `run_id`.
pub async fn ensure_config_table(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS config (run_id text PRIMARY KEY, config jsonb)")
        .execute(pool)
        .await?;
    Ok(())
}

/// `tweets`: the append-only event log.
pub async fn ensure_tweets_table(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE TABLE IF NOT EXISTS tweets (run text, tweet jsonb)")
        .execute(pool)
        .await?;
    Ok(())
}

/// Read the whole desired-subscription set.
pub async fn fetch_subscriptions(
    pool: &PgPool,
) -> Result<Vec<(String, serde_json::Value)>, sqlx::Error> {
    let rows = sqlx::query("SELECT run_id, config FROM config")
        .fetch_all(pool)
        .await?;
    rows.into_iter()
        .map(|row| Ok((row.try_get("run_id")?, row.try_get("config")?)))
        .collect()
}
