//! Tests for configuration validation and loading

use std::collections::HashMap;
use std::time::Duration;

use replica_dispatch::config::{LeaseBackendConfig, SchedulerConfig};
use replica_dispatch::core::{DispatchError, ResourceType};

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (format!("REPLICA_DISPATCH_{k}"), (*v).to_string()))
        .collect();
    move |key| map.get(key).cloned()
}

#[test]
fn test_default_config_validation() {
    let cfg = SchedulerConfig::default();
    assert!(cfg.validate().is_ok());
    assert_eq!(cfg.max_capacity, 10);
    assert_eq!(cfg.db_retrieve_batch_size, 1000);
    assert_eq!(cfg.lease_ttl(), Duration::from_secs(3600));
    assert_eq!(cfg.lease_backend, LeaseBackendConfig::InMemory);
}

#[test]
fn test_zero_values_rejected() {
    let cases = [
        SchedulerConfig { max_capacity: 0, ..SchedulerConfig::default() },
        SchedulerConfig { db_retrieve_batch_size: 0, ..SchedulerConfig::default() },
        SchedulerConfig { lease_ttl_secs: 0, ..SchedulerConfig::default() },
        SchedulerConfig { run_budget_secs: 0, ..SchedulerConfig::default() },
        SchedulerConfig { resource_types: Vec::new(), ..SchedulerConfig::default() },
        SchedulerConfig { identity: " ".into(), ..SchedulerConfig::default() },
    ];
    for cfg in cases {
        assert!(matches!(cfg.validate(), Err(DispatchError::InvalidConfig(_))), "{cfg:?}");
    }
}

#[test]
fn test_watermark_bounds() {
    let too_big = SchedulerConfig {
        max_capacity: 4,
        drain_refill_watermark: Some(5),
        ..SchedulerConfig::default()
    };
    assert!(too_big.validate().is_err());

    let ok = SchedulerConfig {
        max_capacity: 4,
        drain_refill_watermark: Some(4),
        ..SchedulerConfig::default()
    };
    assert_eq!(ok.limits().drain_refill_watermark, 4);
}

#[test]
fn test_from_json_str_fills_defaults() {
    let cfg = SchedulerConfig::from_json_str(
        r#"{
            "identity": "geo_file_download",
            "max_capacity": 2,
            "db_retrieve_batch_size": 5,
            "lease_backend": { "file": { "dir": "/var/run/replica" } },
            "resource_types": ["attachment"]
        }"#,
    )
    .expect("valid config");

    assert_eq!(cfg.identity, "geo_file_download");
    assert_eq!(cfg.run_budget_secs, 3600);
    assert_eq!(cfg.resource_types, [ResourceType::Attachment]);
    assert_eq!(
        cfg.lease_backend,
        LeaseBackendConfig::File { dir: "/var/run/replica".into() }
    );
    let limits = cfg.limits();
    assert_eq!(limits.max_capacity, 2);
    assert_eq!(limits.batch_size, 5);
    assert_eq!(limits.drain_refill_watermark, 1);
}

#[test]
fn test_from_json_str_rejects_invalid() {
    assert!(SchedulerConfig::from_json_str(r#"{ "max_capacity": 0 }"#).is_err());
    assert!(SchedulerConfig::from_json_str("not json").is_err());
}

#[test]
fn test_from_json_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("scheduler.json");
    std::fs::write(&path, r#"{ "max_capacity": 3 }"#).expect("write");

    let cfg = SchedulerConfig::from_json_file(&path).expect("load");
    assert_eq!(cfg.max_capacity, 3);

    let missing = SchedulerConfig::from_json_file(dir.path().join("missing.json"));
    assert!(missing.unwrap_err().to_string().contains("missing.json"));
}

#[test]
fn test_from_env_with_overrides() {
    let cfg = SchedulerConfig::from_env_with(env(&[
        ("IDENTITY", "dispatch-eu"),
        ("MAX_CAPACITY", "25"),
        ("DB_RETRIEVE_BATCH_SIZE", "500"),
        ("LEASE_RENEW_INTERVAL_MS", "0"),
        ("DRAIN_REFILL_WATERMARK", "5"),
        ("LEASE_DIR", "/tmp/leases"),
        ("RESOURCE_TYPES", "blob"),
    ]))
    .expect("env config");

    assert_eq!(cfg.identity, "dispatch-eu");
    assert_eq!(cfg.max_capacity, 25);
    assert_eq!(cfg.db_retrieve_batch_size, 500);
    assert_eq!(cfg.lease_renew_interval(), Duration::ZERO);
    assert_eq!(cfg.drain_refill_watermark, Some(5));
    assert_eq!(cfg.lease_backend, LeaseBackendConfig::File { dir: "/tmp/leases".into() });
    assert_eq!(cfg.resource_types, [ResourceType::Blob]);
}

#[test]
fn test_from_env_with_rejects_garbage() {
    let err = SchedulerConfig::from_env_with(env(&[("MAX_CAPACITY", "ten")])).unwrap_err();
    assert!(err.to_string().contains("REPLICA_DISPATCH_MAX_CAPACITY"));

    assert!(SchedulerConfig::from_env_with(env(&[("RESOURCE_TYPES", "lfs")])).is_err());
    assert!(SchedulerConfig::from_env_with(env(&[("MAX_CAPACITY", "0")])).is_err());
}

#[test]
fn test_from_env_with_nothing_set_is_default() {
    let cfg = SchedulerConfig::from_env_with(|_| None).expect("defaults");
    assert_eq!(cfg, SchedulerConfig::default());
}
