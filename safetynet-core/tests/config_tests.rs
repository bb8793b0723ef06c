//! Config file integration tests: defaults, partial files, corrupt files and
//! atomic saves under an isolated home.

use assert_fs::prelude::*;
use predicates::prelude::predicate;
use safetynet_core::config::{self, DEFAULT_ARRIVAL_RADIUS_M, DEFAULT_CHECK_IN_HOURS};
use safetynet_core::{ConfigError, SafetyConfig};

#[test]
fn missing_file_yields_defaults() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg, SafetyConfig::default());
    assert_eq!(cfg.arrival_radius_m, 200.0);
    assert_eq!(cfg.default_check_in_hours, 1.0);
    assert_eq!(cfg.capture.interval_secs, 300);
    assert_eq!(cfg.capture.distance_m, 50.0);
}

#[test]
fn partial_file_keeps_defaults_for_the_rest() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".safetynet/config.yaml")
        .write_str("arrival_radius_m: 75.0\ncapture:\n  interval_secs: 60\n")
        .expect("write");

    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg.arrival_radius_m, 75.0);
    assert_eq!(cfg.capture.interval_secs, 60);
    assert_eq!(cfg.capture.distance_m, 50.0);
    assert_eq!(cfg.default_check_in_hours, DEFAULT_CHECK_IN_HOURS);
    assert!(cfg.push.enabled);
}

#[test]
fn unsafe_values_are_replaced_on_load() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".safetynet/config.yaml")
        .write_str("arrival_radius_m: -1.0\ndefault_check_in_hours: 0.0\n")
        .expect("write");

    let cfg = config::load_at(home.path()).expect("load");
    assert_eq!(cfg.arrival_radius_m, DEFAULT_ARRIVAL_RADIUS_M);
    assert_eq!(cfg.default_check_in_hours, DEFAULT_CHECK_IN_HOURS);
}

#[test]
fn corrupt_file_reports_path() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    home.child(".safetynet/config.yaml")
        .write_str(": : corrupt : yaml : !!!\n  - broken: [unclosed")
        .expect("write");

    let err = config::load_at(home.path()).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains("config.yaml"));
}

#[test]
fn save_is_atomic_and_round_trips() {
    let home = assert_fs::TempDir::new().expect("tempdir");
    let mut cfg = SafetyConfig::default();
    cfg.push.enabled = false;
    cfg.countdown_tick_ms = 250;

    config::save_at(home.path(), &cfg).expect("save");

    home.child(".safetynet/config.yaml")
        .assert(predicate::path::exists());
    home.child(".safetynet/config.yaml")
        .assert(predicate::str::contains("countdown_tick_ms: 250"));
    home.child(".safetynet/config.yaml.tmp")
        .assert(predicate::path::missing());
    assert_eq!(config::load_at(home.path()).expect("reload"), cfg);
}
