//! Tests for clock utilities

use std::time::Duration;

use replica_dispatch::util::clock::{expiry_after, now_ms};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_expiry_after_adds_ttl() {
    let before = now_ms();
    let expiry = expiry_after(Duration::from_millis(1500));
    assert!(expiry >= before + 1500);
}

#[test]
fn test_init_tracing_is_idempotent() {
    replica_dispatch::util::telemetry::init_tracing();
    replica_dispatch::util::telemetry::init_tracing();
}
