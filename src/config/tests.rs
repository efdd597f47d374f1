//! Tests for config functionality.

use crate::config::{CONFIG_ENV, Config, EscalationMode};
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_default_config() {
    let config = Config::default();

    assert_eq!(config.engine.escalation_threshold, 5_000);
    assert_eq!(config.engine.escalation, EscalationMode::Full);
    assert!(!config.engine.read_committed_snapshot);
    assert_eq!(config.observer.probe_timeout(), Duration::from_secs(5));
    assert_eq!(config.threshold.row_count, 10_000);
    assert_eq!(config.threshold.pool_size, 5);
    assert_eq!(config.threshold.table, "foo.FOO_LOCK_TABLE_NO_PK");
    assert_eq!(config.harness.row_count, 10);
    assert_eq!(config.harness.pool_size, 20);
    assert_eq!(config.harness.barrier_timeout(), Duration::from_secs(60));
    assert_eq!(config.harness.completion_timeout(), Duration::from_secs(20));
    assert_eq!(config.harness.first_dwell(), Duration::from_secs(10));
    assert_eq!(config.harness.dump_settle(), Duration::from_secs(2));
    assert_eq!(config.harness.worker_budget(), Duration::from_secs(82));
    assert_eq!(config.harness.keyed_index, "PK_FOO_LOCK_TABLE_PK");
    assert_eq!(config.tx_wait.writer_hold(), Duration::from_secs(15));
    assert_eq!(config.tx_wait.reader_delay(), Duration::from_secs(5));
    assert!(config.validate().is_ok());
}

#[test]
fn test_parse_empty_yaml() {
    let config = Config::from_yaml("").unwrap();
    assert_eq!(config.threshold.row_count, 10_000);
    assert_eq!(config.harness.row_count, 10);
}

#[test]
fn test_parse_partial_yaml() {
    let yaml = r#"
engine:
  escalation: residual
harness:
  first_dwell_ms: 250
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert_eq!(config.engine.escalation, EscalationMode::Residual);
    assert_eq!(config.harness.first_dwell(), Duration::from_millis(250));

    // Unspecified values keep their defaults, even inside a touched section
    assert_eq!(config.engine.escalation_threshold, 5_000);
    assert_eq!(config.harness.second_dwell_ms, 10_000);
    assert_eq!(config.tx_wait.table, "TestTable");
}

#[test]
fn test_unknown_fields_are_ignored() {
    let yaml = r#"
connection_url: "mssql://localhost:1433"
threshold:
  row_count: 2000
  future_knob: true
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert_eq!(config.threshold.row_count, 2_000);
}

#[test]
fn test_invalid_escalation_mode_fails() {
    let result = Config::from_yaml("engine:\n  escalation: partial\n");
    assert!(result.is_err());
}

#[test]
fn test_zero_timeout_fails_validation() {
    let err = Config::from_yaml("observer:\n  probe_timeout_ms: 0\n").unwrap_err();
    assert!(err.to_string().contains("observer.probe_timeout_ms"));
}

#[test]
fn test_small_harness_pool_fails_validation() {
    let err = Config::from_yaml("harness:\n  pool_size: 3\n").unwrap_err();
    assert!(err.to_string().contains("harness.pool_size"));
}

#[test]
fn test_single_row_harness_fails_validation() {
    let err = Config::from_yaml("harness:\n  row_count: 1\n").unwrap_err();
    assert!(err.to_string().contains("harness.row_count"));
}

#[test]
fn test_same_harness_tables_fail_validation() {
    let yaml = "harness:\n  heap_table: t\n  keyed_table: t\n";
    assert!(Config::from_yaml(yaml).is_err());
}

#[test]
fn test_yaml_round_trip_keeps_overrides() {
    let mut config = Config::default();
    config.engine.escalation_threshold = 42;
    config.tx_wait.writer_hold_ms = 900;

    let yaml = config.to_yaml().unwrap();
    let parsed = Config::from_yaml(&yaml).unwrap();

    assert_eq!(parsed.engine.escalation_threshold, 42);
    assert_eq!(parsed.tx_wait.writer_hold_ms, 900);
}

#[test]
fn test_load_from_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("lockscope.yaml");
    std::fs::write(&path, "threshold:\n  row_count: 300\n").unwrap();

    let config = Config::load(&path).unwrap();
    assert_eq!(config.threshold.row_count, 300);
}

#[test]
fn test_load_missing_file_fails() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(dir.path().join("missing.yaml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config file"));
}

#[test]
#[serial]
fn test_resolve_prefers_explicit_path_over_env() {
    let dir = TempDir::new().unwrap();
    let explicit = dir.path().join("explicit.yaml");
    let from_env = dir.path().join("env.yaml");
    std::fs::write(&explicit, "harness:\n  row_count: 20\n").unwrap();
    std::fs::write(&from_env, "harness:\n  row_count: 30\n").unwrap();

    // SAFETY: serialized with every other test touching the environment.
    unsafe { std::env::set_var(CONFIG_ENV, &from_env) };
    let config = Config::resolve(Some(&explicit));
    let env_config = Config::resolve(None);
    unsafe { std::env::remove_var(CONFIG_ENV) };

    assert_eq!(config.unwrap().harness.row_count, 20);
    assert_eq!(env_config.unwrap().harness.row_count, 30);
}

#[test]
#[serial]
fn test_resolve_without_sources_uses_defaults() {
    unsafe { std::env::remove_var(CONFIG_ENV) };
    // The crate root carries no lockscope.yaml, so defaults apply.
    let config = Config::resolve(None).unwrap();
    assert_eq!(config.threshold.row_count, 10_000);
}
