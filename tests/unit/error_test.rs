//! Tests for error types

use replica_dispatch::core::DispatchError;

#[test]
fn test_catalog_error() {
    let err = DispatchError::Catalog("connection refused".to_string());
    assert_eq!(format!("{}", err), "catalog error: connection refused");
}

#[test]
fn test_lease_error() {
    let err = DispatchError::Lease("store offline".to_string());
    assert_eq!(format!("{}", err), "lease error: store offline");
}

#[test]
fn test_dispatch_error() {
    let err = DispatchError::Dispatch("queue full".to_string());
    assert_eq!(format!("{}", err), "dispatch error: queue full");
}

#[test]
fn test_invalid_config_error() {
    let err = DispatchError::InvalidConfig("max_capacity must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: max_capacity must be greater than 0"
    );
}

#[test]
fn test_error_converts_into_anyhow() {
    fn load() -> replica_dispatch::core::AppResult<()> {
        Err(DispatchError::Registry("write failed".into()).into())
    }
    let err = load().unwrap_err();
    assert_eq!(err.to_string(), "registry error: write failed");
    assert!(err.downcast_ref::<DispatchError>().is_some());
}
