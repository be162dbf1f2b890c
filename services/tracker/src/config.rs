//! Tracker configuration loading.
//!
//! TOML is the sole config source; no environment variable overrides
//! (except `RUST_LOG`, which outranks `loglevel` for the tracing filter).
//! Default config path: `/etc/tracker/tracker.toml`.
//!
//! # Required fields
//! - `database.name`
//! - `database.user`
//!
//! Everything else has a default.  Periods are whole seconds and must be
//! positive.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default upstream filter endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://stream.twitter.com/1.1/statuses/filter.json";

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

/// Top-level tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub database: DatabaseConfig,
    /// Upstream streaming endpoint (overridable for test rigs).
    pub endpoint: String,
    /// Reconciler period.
    pub reload_every: Duration,
    /// Batcher period.
    pub save_every: Duration,
    /// Counter period.
    pub count_every: Duration,
    /// Log verbosity: `error`, `warn`, `info`, `debug`, or `trace`.
    pub loglevel: String,
    /// Optional path for the size-rotated log sink; stdout when unset.
    pub logfile: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub name: String,
    pub user: String,
    pub password: String,
    pub host: String,
}

// ---------------------------------------------------------------------------
// Raw TOML deserialization types (with Option for optional fields)
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawConfig {
    endpoint: Option<String>,
    reload_every: Option<u64>,
    save_every: Option<u64>,
    count_every: Option<u64>,
    loglevel: Option<String>,
    logfile: Option<PathBuf>,
    database: Option<RawDatabaseConfig>,
}

#[derive(Debug, Deserialize)]
struct RawDatabaseConfig {
    name: Option<String>,
    user: Option<String>,
    password: Option<String>,
    host: Option<String>,
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Load tracker config from a custom path.
pub fn load_config_from_path(path: &Path) -> Result<TrackerConfig, ConfigError> {
    let toml_str = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Io(format!("reading config file '{}': {}", path.display(), e)))?;
    load_config_from_str(&toml_str)
}

/// Load tracker config from a TOML string.
pub fn load_config_from_str(toml_str: &str) -> Result<TrackerConfig, ConfigError> {
    let raw: RawConfig = toml::from_str(toml_str).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let raw_db = raw
        .database
        .ok_or(ConfigError::MissingField("database"))?;
    let database = DatabaseConfig {
        name: raw_db.name.ok_or(ConfigError::MissingField("database.name"))?,
        user: raw_db.user.ok_or(ConfigError::MissingField("database.user"))?,
        password: raw_db.password.unwrap_or_default(),
        host: raw_db.host.unwrap_or_else(|| "localhost".to_owned()),
    };

    let loglevel = raw.loglevel.unwrap_or_else(|| "info".to_owned());
    if !matches!(
        loglevel.as_str(),
        "error" | "warn" | "info" | "debug" | "trace"
    ) {
        return Err(ConfigError::InvalidValue(format!(
            "loglevel must be one of error/warn/info/debug/trace, got '{loglevel}'"
        )));
    }

    Ok(TrackerConfig {
        database,
        endpoint: raw.endpoint.unwrap_or_else(|| DEFAULT_ENDPOINT.to_owned()),
        reload_every: period("reload_every", raw.reload_every.unwrap_or(10))?,
        save_every: period("save_every", raw.save_every.unwrap_or(1))?,
        count_every: period("count_every", raw.count_every.unwrap_or(60))?,
        loglevel,
        logfile: raw.logfile,
    })
}

fn period(field: &str, seconds: u64) -> Result<Duration, ConfigError> {
    if seconds == 0 {
        return Err(ConfigError::InvalidValue(format!(
            "{field} must be a positive number of seconds"
        )));
    }
    Ok(Duration::from_secs(seconds))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
    #[error("Invalid config value: {0}")]
    InvalidValue(String),
}
