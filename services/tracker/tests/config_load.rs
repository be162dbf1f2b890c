/// Integration tests for tracker config loading.
///
/// Covers default values, required field validation, and period/loglevel
/// sanity checks.
use std::io::Write;
use std::time::Duration;
use tracker::config::{DEFAULT_ENDPOINT, load_config_from_path, load_config_from_str};

const MINIMAL: &str = r#"
[database]
name = "tweets"
user = "tracker"
"#;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

#[test]
fn minimal_config_loads_with_defaults() {
    let cfg = load_config_from_str(MINIMAL).expect("should load");
    assert_eq!(cfg.database.name, "tweets");
    assert_eq!(cfg.database.user, "tracker");
    assert_eq!(cfg.database.password, "");
    assert_eq!(cfg.database.host, "localhost");
    assert_eq!(cfg.endpoint, DEFAULT_ENDPOINT);
    assert_eq!(cfg.reload_every, Duration::from_secs(10));
    assert_eq!(cfg.save_every, Duration::from_secs(1));
    assert_eq!(cfg.count_every, Duration::from_secs(60));
    assert_eq!(cfg.loglevel, "info");
    assert!(cfg.logfile.is_none());
}

#[test]
fn explicit_values_are_loaded() {
    let toml = r#"
reload_every = 30
save_every = 5
count_every = 120
loglevel = "debug"
logfile = "/var/log/tracker/tracker.log"
endpoint = "http://127.0.0.1:9999/filter"

[database]
name = "tweets"
user = "tracker"
password = "hunter2"
host = "db.internal"
"#;
    let cfg = load_config_from_str(toml).unwrap();
    assert_eq!(cfg.reload_every, Duration::from_secs(30));
    assert_eq!(cfg.save_every, Duration::from_secs(5));
    assert_eq!(cfg.count_every, Duration::from_secs(120));
    assert_eq!(cfg.loglevel, "debug");
    assert_eq!(
        cfg.logfile.as_deref(),
        Some(std::path::Path::new("/var/log/tracker/tracker.log"))
    );
    assert_eq!(cfg.endpoint, "http://127.0.0.1:9999/filter");
    assert_eq!(cfg.database.password, "hunter2");
    assert_eq!(cfg.database.host, "db.internal");
}

// ---------------------------------------------------------------------------
// Required fields
// ---------------------------------------------------------------------------

#[test]
fn missing_database_section_fails() {
    let result = load_config_from_str("reload_every = 10\n");
    assert!(result.is_err(), "missing [database] must fail");
}

#[test]
fn missing_database_name_fails() {
    let result = load_config_from_str("[database]\nuser = \"tracker\"\n");
    assert!(result.is_err(), "missing database.name must fail");
}

#[test]
fn missing_database_user_fails() {
    let result = load_config_from_str("[database]\nname = \"tweets\"\n");
    assert!(result.is_err(), "missing database.user must fail");
}

// ---------------------------------------------------------------------------
// Value validation
// ---------------------------------------------------------------------------

#[test]
fn zero_period_fails() {
    let toml = format!("save_every = 0\n{MINIMAL}");
    assert!(load_config_from_str(&toml).is_err(), "zero period must fail");
}

#[test]
fn unknown_loglevel_fails() {
    let toml = format!("loglevel = \"verbose\"\n{MINIMAL}");
    assert!(load_config_from_str(&toml).is_err(), "bad loglevel must fail");
}

#[test]
fn invalid_toml_fails() {
    assert!(load_config_from_str("not = [valid").is_err());
}

// ---------------------------------------------------------------------------
// load_config_from_path
// ---------------------------------------------------------------------------

#[test]
fn load_config_from_path_reads_toml_file() {
    let mut config_file = tempfile::NamedTempFile::new().unwrap();
    config_file.write_all(MINIMAL.as_bytes()).unwrap();
    let cfg = load_config_from_path(config_file.path()).expect("should load from path");
    assert_eq!(cfg.database.name, "tweets");
}

#[test]
fn nonexistent_config_path_fails() {
    let result = load_config_from_path(std::path::Path::new("/nonexistent/tracker.toml"));
    assert!(result.is_err());
}
