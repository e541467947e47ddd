//! Tests for the in-memory catalog behind the policy layer

use std::sync::Arc;

use replica_dispatch::core::{
    JobOutcome, Node, NodeDirectory, Owner, PendingResourceSource, PolicySet, RegistryStore,
    Resource, ResourceDispatchPolicy, ResourceKey, ResourceType,
};
use replica_dispatch::infra::InMemoryCatalog;

use crate::common::{blob_key, blobs, catalog_with, catalog_with_secondary, PRIMARY_URL};

fn attachment(id: u64) -> Resource {
    Resource::new(ResourceKey::new(ResourceType::Attachment, id), 1, Owner::Unowned)
}

#[test]
fn test_policy_set_rotates_leading_type() {
    let catalog = catalog_with_secondary();
    catalog.add_resources(blobs(1..=2));
    catalog.add_resources([attachment(1), attachment(2)]);
    let policy = PolicySet::all(Arc::clone(&catalog));

    let keys = |batch: Vec<Resource>| -> Vec<String> {
        batch.iter().map(|r| r.key.to_string()).collect()
    };
    let first = keys(policy.next_batch(10).unwrap());
    let second = keys(policy.next_batch(10).unwrap());

    assert_eq!(first, ["blob:1", "attachment:1", "blob:2", "attachment:2"]);
    assert_eq!(second, ["attachment:1", "blob:1", "attachment:2", "blob:2"]);
}

#[test]
fn test_policy_set_honours_batch_size() {
    let catalog = catalog_with_secondary();
    catalog.add_resources(blobs(1..=10));
    catalog.add_resources((1..=10).map(attachment));
    let policy = PolicySet::all(Arc::clone(&catalog));
    assert_eq!(policy.next_batch(7).unwrap().len(), 7);
}

#[test]
fn test_disabled_resource_type_is_never_queried() {
    let node = Node::secondary(2, "http://secondary").with_resource_types([ResourceType::Blob]);
    let catalog = catalog_with(node);
    catalog.add_resources(blobs(1..=2));
    catalog.add_resource(attachment(1));
    let policy = PolicySet::all(Arc::clone(&catalog));

    let batch = policy.next_batch(10).unwrap();
    assert!(batch.iter().all(|r| r.key.resource_type == ResourceType::Blob));
    assert_eq!(catalog.query_count(), 1);
}

#[test]
fn test_inactive_node_yields_empty_batch() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_resources(blobs(1..=3));
    let policy = PolicySet::all(Arc::clone(&catalog));
    assert!(!policy.node_active().unwrap());
    assert!(policy.next_batch(10).unwrap().is_empty());
    assert_eq!(catalog.query_count(), 0);
}

#[test]
fn test_build_job_needs_primary() {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_node(Node::secondary(2, "http://secondary"));
    catalog.set_current_node(2);
    catalog.add_resources(blobs([1]));
    let policy = PolicySet::all(Arc::clone(&catalog));

    let batch = policy.next_batch(1).unwrap();
    assert!(policy.build_job(&batch[0]).is_err());

    catalog.add_node(Node::primary(1, PRIMARY_URL));
    let batch = policy.next_batch(1).unwrap();
    let job = policy.build_job(&batch[0]).unwrap();
    assert_eq!(job.target.url(), format!("{PRIMARY_URL}/transfers/blob/1"));
}

#[test]
fn test_synced_resources_leave_backlog() {
    let catalog = catalog_with_secondary();
    catalog.add_resources(blobs(1..=3));
    let policy = PolicySet::new(Arc::clone(&catalog), [ResourceType::Blob]);

    catalog.record_outcome(blob_key(2), &JobOutcome::Success, 1).unwrap();
    let ids: Vec<u64> = policy.next_batch(10).unwrap().iter().map(|r| r.key.id).collect();
    assert_eq!(ids, [1, 3]);
}

#[test]
fn test_cleared_failure_returns_to_backlog() {
    let catalog = catalog_with_secondary();
    catalog.add_resources(blobs([5]));
    catalog
        .record_outcome(blob_key(5), &JobOutcome::PermanentFailure("checksum mismatch".into()), 1)
        .unwrap();
    assert_eq!(catalog.current_node().unwrap().unwrap().id, 2);

    let policy = PolicySet::all(Arc::clone(&catalog));
    assert!(policy.next_batch(10).unwrap().is_empty());
    assert!(catalog.clear_failure(blob_key(5)).unwrap());
    assert_eq!(policy.next_batch(10).unwrap().len(), 1);
}
