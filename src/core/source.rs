//! Backlog access: the catalog query interface and the pending-resource cursor.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::core::model::{NamespaceId, Node, Resource, ResourceType};
use crate::core::DispatchError;

/// Node-level filter handed to the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFilter {
    /// Resource type to enumerate.
    pub resource_type: ResourceType,
    /// Namespace restriction as declared by the node (descendants are
    /// resolved by the catalog). Empty means unrestricted.
    pub namespaces: BTreeSet<NamespaceId>,
}

impl NodeFilter {
    /// Filter for `resource_type` under `node`'s namespace restriction.
    pub fn for_node(node: &Node, resource_type: ResourceType) -> Self {
        Self {
            resource_type,
            namespaces: node.namespaces.clone(),
        }
    }

    /// Whether a namespace restriction applies.
    pub fn is_restricted(&self) -> bool {
        !self.namespaces.is_empty()
    }
}

/// Persistent catalog of resources and their registry records.
///
/// `list_eligible` returns resources of the filter's type that pass the
/// namespace restriction and have no excluding registry record (synced or
/// permanently failed). It is synchronous and side-effect-free; ordering is
/// not part of the contract.
pub trait ResourceCatalog: Send + Sync {
    /// Enumerate up to `limit` eligible resources.
    fn list_eligible(
        &self,
        filter: &NodeFilter,
        limit: usize,
    ) -> Result<Vec<Resource>, DispatchError>;
}

/// Read access to the node the scheduler runs on.
pub trait NodeDirectory: Send + Sync {
    /// The current node, if registered.
    fn current_node(&self) -> Result<Option<Node>, DispatchError>;
    /// The primary node transfers pull from, if registered.
    fn primary_node(&self) -> Result<Option<Node>, DispatchError>;
}

impl<T: ResourceCatalog + ?Sized> ResourceCatalog for Arc<T> {
    fn list_eligible(
        &self,
        filter: &NodeFilter,
        limit: usize,
    ) -> Result<Vec<Resource>, DispatchError> {
        (**self).list_eligible(filter, limit)
    }
}

impl<T: NodeDirectory + ?Sized> NodeDirectory for Arc<T> {
    fn current_node(&self) -> Result<Option<Node>, DispatchError> {
        (**self).current_node()
    }

    fn primary_node(&self) -> Result<Option<Node>, DispatchError> {
        (**self).primary_node()
    }
}

/// Batched cursor over the replication backlog.
///
/// A batch smaller than `max_size` hints that the backlog is exhausted but
/// does not guarantee it; callers must tolerate empty batches while their
/// own jobs are still completing. Implementations apply every node-level
/// filter; the scheduler only deduplicates against its in-flight set.
pub trait PendingResourceSource: Send + Sync {
    /// Fetch up to `max_size` pending resources.
    fn next_batch(&self, max_size: usize) -> Result<Vec<Resource>, DispatchError>;
}

impl<T: PendingResourceSource + ?Sized> PendingResourceSource for Arc<T> {
    fn next_batch(&self, max_size: usize) -> Result<Vec<Resource>, DispatchError> {
        (**self).next_batch(max_size)
    }
}
