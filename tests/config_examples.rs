//! ---
//! ecc_section: "15-testing-qa-runbook"
//! ecc_subsection: "integration-tests"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Integration and validation tests for the equipment control center."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ecc_common::config::{AppConfig, ConfigStoreBackend, ProfileKind, WireFormat};

fn repo_path(path: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("..").join(path)
}

#[test]
fn shipped_daemon_config_is_valid() {
    let contents = fs::read_to_string(repo_path("configs/eccd.toml")).expect("read eccd.toml");
    let config: AppConfig = contents.parse().expect("eccd.toml parses and validates");

    assert_eq!(config.bus.wire_format, WireFormat::Json);
    assert_eq!(config.services.len(), 2);
    assert_eq!(config.services["cnc-service"].profile, ProfileKind::Cnc);
    assert_eq!(config.services["printer-service"].profile, ProfileKind::Printer);
    assert_eq!(config.heartbeat.interval, Duration::from_secs(5));
    assert_eq!(config.registry.online_threshold, Duration::from_secs(30));
    assert_eq!(config.command.default_timeout, Duration::from_secs(10));
    assert_eq!(config.config_store.backend, ConfigStoreBackend::Memory);
}

#[test]
fn duplicate_service_ids_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("eccd.toml");
    fs::write(
        &path,
        r#"
[services.left]
profile = "cnc"
service_id = "same"

[services.right]
profile = "printer"
service_id = "same"
"#,
    )
    .expect("write config");

    let err = AppConfig::load(&[path]).expect_err("duplicate ids");
    assert!(format!("{err:#}").contains("same"));
}

#[test]
fn heartbeat_floor_above_interval_is_rejected() {
    let err = r#"
[heartbeat]
interval = 500
min_interval = 1000
"#
    .parse::<AppConfig>()
    .expect_err("floor above interval");
    assert!(!err.to_string().is_empty());
}
