//! ---
//! ecc_section: "01-core-functionality"
//! ecc_subsection: "module"
//! ecc_type: "source"
//! ecc_scope: "code"
//! ecc_description: "Shared primitives and utilities for the core runtime."
//! ecc_version: "v0.1.0"
//! ecc_owner: "tbd"
//! ---
use std::fs;
use std::time::Duration;

use ecc_common::config::{AppConfig, ConfigStoreBackend, ProfileKind, WireFormat};

const SAMPLE: &str = r#"
[bus]
wire_format = "cbor"
max_retries = 2
retry_interval = 50

[services.cnc-service]
profile = "cnc"
service_id = "cnc-01"
metadata = { location = "Shop floor" }

[heartbeat]
interval = 2000
min_interval = 500

[config_store]
backend = "consul"
consul_address = "http://consul.local:8500"
"#;

#[test]
fn loads_first_existing_candidate() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("missing.toml");
    let present = dir.path().join("eccd.toml");
    fs::write(&present, SAMPLE).expect("write config");

    let loaded = AppConfig::load_with_source(&[&missing, &present]).expect("config loads");
    assert_eq!(loaded.source, present);

    let config = loaded.config;
    assert_eq!(config.bus.wire_format, WireFormat::Cbor);
    assert_eq!(config.bus.max_retries, 2);
    assert_eq!(config.bus.retry_interval, Duration::from_millis(50));
    assert_eq!(config.heartbeat.interval, Duration::from_secs(2));
    assert_eq!(config.config_store.backend, ConfigStoreBackend::Consul);
    let service = &config.services["cnc-service"];
    assert_eq!(service.profile, ProfileKind::Cnc);
    assert_eq!(service.service_id.as_deref(), Some("cnc-01"));
}

#[test]
fn missing_candidates_report_inspected_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let missing = dir.path().join("nowhere.toml");
    let err = AppConfig::load(&[&missing]).expect_err("no config present");
    assert!(err.to_string().contains("nowhere.toml"));
}

#[test]
fn unknown_profile_fails_to_parse() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[services.x]\nprofile = \"lathe\"\n").expect("write config");
    let err = AppConfig::load(&[&path]).expect_err("unknown profile");
    assert!(format!("{err:#}").contains("lathe"));
}
