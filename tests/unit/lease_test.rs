//! Tests for the exclusive run lock over both lease backends

use std::sync::Arc;
use std::time::Duration;

use replica_dispatch::core::{ExclusiveRunLock, LeaseStore};
use replica_dispatch::infra::{FileLeaseStore, InMemoryLeaseStore};

const TTL: Duration = Duration::from_secs(30);

fn exercise_exclusivity<L: LeaseStore + Clone>(store: L) {
    let first = ExclusiveRunLock::new(store.clone(), "dispatch");
    let second = ExclusiveRunLock::new(store.clone(), "dispatch");
    assert_ne!(first.holder(), second.holder());

    assert!(first.try_acquire(TTL).unwrap());
    assert!(!second.try_acquire(TTL).unwrap());
    assert!(first.renew(TTL).unwrap());
    assert!(!second.renew(TTL).unwrap());

    // Releasing someone else's lease does nothing.
    second.release().unwrap();
    assert_eq!(store.current("dispatch").unwrap().unwrap().holder, first.holder());

    first.release().unwrap();
    assert!(store.current("dispatch").unwrap().is_none());
    assert!(second.try_acquire(TTL).unwrap());
}

#[test]
fn test_in_memory_lock_exclusivity() {
    exercise_exclusivity(Arc::new(InMemoryLeaseStore::new()));
}

#[test]
fn test_file_lock_exclusivity() {
    let dir = tempfile::tempdir().expect("tempdir");
    exercise_exclusivity(Arc::new(FileLeaseStore::new(dir.path()).expect("store")));
}

#[test]
fn test_identities_are_independent() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let blobs = ExclusiveRunLock::new(Arc::clone(&store), "blob_dispatch");
    let uploads = ExclusiveRunLock::new(Arc::clone(&store), "upload_dispatch");
    assert!(blobs.try_acquire(TTL).unwrap());
    assert!(uploads.try_acquire(TTL).unwrap());
    assert_eq!(blobs.identity(), "blob_dispatch");
}

#[test]
fn test_expired_lease_is_reclaimed_and_old_holder_loses_it() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let crashed = ExclusiveRunLock::new(Arc::clone(&store), "dispatch");
    let next = ExclusiveRunLock::new(Arc::clone(&store), "dispatch");

    assert!(crashed.try_acquire(Duration::ZERO).unwrap());
    assert!(store.current("dispatch").unwrap().unwrap().is_expired());
    assert!(next.try_acquire(TTL).unwrap());
    assert!(!crashed.renew(TTL).unwrap());
}

#[test]
fn test_cleared_lease_fails_renewal() {
    let store = Arc::new(InMemoryLeaseStore::new());
    let lock = ExclusiveRunLock::new(Arc::clone(&store), "dispatch");
    lock.try_acquire(TTL).unwrap();
    assert!(store.clear("dispatch"));
    assert!(!lock.renew(TTL).unwrap());
}

#[test]
fn test_file_lease_is_json() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = FileLeaseStore::new(dir.path()).expect("store");
    store.try_acquire("geo dispatch", "holder-1", TTL).unwrap();

    let files: Vec<_> = std::fs::read_dir(dir.path())
        .expect("read_dir")
        .map(|e| e.expect("entry").path())
        .collect();
    assert_eq!(files.len(), 1);
    let raw = std::fs::read_to_string(&files[0]).expect("read");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["holder"], "holder-1");
}
