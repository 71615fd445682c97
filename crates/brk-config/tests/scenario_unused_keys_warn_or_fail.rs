//! Unused config keys.
//!
//! Validates:
//! 1) Unused keys are detected under Warn without erroring.
//! 2) Fail turns them into an error.
//! 3) Consumed keys are never flagged.

use brk_config::{load_layered_yaml_from_strings, report_unused_keys, UnusedKeyPolicy};

const YAML: &str = r#"
accrual:
  rate_percent: "10"
  workers: 4
  legacy_rounding: banker
calendar:
  holidays_csv: config/holidays.csv
unused_section:
  foo: 1
  bar: 2
"#;

#[test]
fn warn_mode_reports_without_error() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Warn).unwrap();

    assert!(!report.is_clean());
    assert_eq!(
        report.unused_leaf_pointers,
        vec![
            "/accrual/legacy_rounding".to_string(),
            "/unused_section/bar".to_string(),
            "/unused_section/foo".to_string(),
        ]
    );
}

#[test]
fn fail_mode_errors() {
    let loaded = load_layered_yaml_from_strings(&[YAML]).unwrap();
    let err = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail)
        .unwrap_err()
        .to_string();
    assert!(err.contains("CONFIG_UNUSED_KEYS"), "got: {err}");
    assert!(err.contains("3 unused"));
}

#[test]
fn fully_consumed_config_is_clean() {
    let yaml = r#"
accrual:
  rate_percent: "10"
  day_count_basis: tradeable
  workers: 8
  write_batch_size: 25
calendar:
  holidays_csv: config/holidays.csv
database:
  url_env: BRK_DATABASE_URL
  max_connections: 5
"#;
    let loaded = load_layered_yaml_from_strings(&[yaml]).unwrap();
    let report = report_unused_keys(&loaded.config_json, UnusedKeyPolicy::Fail).unwrap();
    assert!(report.is_clean());
}
