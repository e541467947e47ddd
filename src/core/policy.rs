//! Per-resource-type dispatch policy and the round-robin backlog source.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::dispatch::{TransferJob, TransferTarget};
use crate::core::model::{Node, Resource, ResourceType};
use crate::core::source::{NodeDirectory, NodeFilter, PendingResourceSource, ResourceCatalog};
use crate::core::DispatchError;

/// Resource-type-specific behaviour, one variant per [`ResourceType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypePolicy {
    /// Content-addressed blob objects.
    Blob,
    /// User-uploaded attachments.
    Attachment,
}

impl TypePolicy {
    /// Policy for a resource type.
    pub const fn for_type(resource_type: ResourceType) -> Self {
        match resource_type {
            ResourceType::Blob => Self::Blob,
            ResourceType::Attachment => Self::Attachment,
        }
    }

    /// Resource type this policy handles.
    pub const fn resource_type(self) -> ResourceType {
        match self {
            Self::Blob => ResourceType::Blob,
            Self::Attachment => ResourceType::Attachment,
        }
    }

    /// Enumerate eligible resources of this type for `node`.
    pub fn pending<C>(
        self,
        catalog: &C,
        node: &Node,
        limit: usize,
    ) -> Result<Vec<Resource>, DispatchError>
    where
        C: ResourceCatalog + ?Sized,
    {
        if limit == 0 || !node.resource_types.contains(&self.resource_type()) {
            return Ok(Vec::new());
        }
        catalog.list_eligible(&NodeFilter::for_node(node, self.resource_type()), limit)
    }

    /// Transfer path on the primary for `resource`.
    pub fn transfer_path(self, resource: &Resource) -> String {
        match self {
            Self::Blob => format!("/transfers/blob/{}", resource.key.id),
            Self::Attachment => format!("/transfers/attachment/{}", resource.key.id),
        }
    }

    /// Build the job that replicates `resource` from `primary_url`.
    pub fn transfer_job(self, resource: &Resource, primary_url: &str) -> TransferJob {
        TransferJob {
            key: resource.key,
            size_bytes: resource.size_bytes,
            target: TransferTarget {
                primary_url: primary_url.to_string(),
                path: self.transfer_path(resource),
            },
        }
    }
}

/// What the scheduler needs from the policy layer: a filtered backlog plus a
/// way to turn an admitted resource into a job.
pub trait ResourceDispatchPolicy: PendingResourceSource {
    /// Whether the current node should be dispatching at all.
    fn node_active(&self) -> Result<bool, DispatchError>;
    /// Job for an admitted resource.
    fn build_job(&self, resource: &Resource) -> Result<TransferJob, DispatchError>;
}

impl<T: ResourceDispatchPolicy + ?Sized> ResourceDispatchPolicy for Arc<T> {
    fn node_active(&self) -> Result<bool, DispatchError> {
        (**self).node_active()
    }

    fn build_job(&self, resource: &Resource) -> Result<TransferJob, DispatchError> {
        (**self).build_job(resource)
    }
}

/// Backlog source over several resource types sharing one capacity budget.
///
/// Each batch queries every enabled type and interleaves the results
/// round-robin; the leading type rotates per batch so no type starves.
pub struct PolicySet<C> {
    catalog: C,
    policies: Vec<TypePolicy>,
    rotation: AtomicUsize,
    primary_url: Mutex<Option<String>>,
}

impl<C> PolicySet<C>
where
    C: ResourceCatalog + NodeDirectory,
{
    /// Policies for the given types, in interleave order.
    pub fn new(catalog: C, types: impl IntoIterator<Item = ResourceType>) -> Self {
        let mut policies: Vec<TypePolicy> = Vec::new();
        for t in types {
            let policy = TypePolicy::for_type(t);
            if !policies.contains(&policy) {
                policies.push(policy);
            }
        }
        Self {
            catalog,
            policies,
            rotation: AtomicUsize::new(0),
            primary_url: Mutex::new(None),
        }
    }

    /// Policies for every known type.
    pub fn all(catalog: C) -> Self {
        Self::new(catalog, ResourceType::ALL)
    }

    /// The underlying catalog.
    pub const fn catalog(&self) -> &C {
        &self.catalog
    }

    fn replicating_node(&self) -> Result<Option<Node>, DispatchError> {
        Ok(self.catalog.current_node()?.filter(Node::is_replicating))
    }

    fn refresh_primary(&self) -> Result<(), DispatchError> {
        let url = self.catalog.primary_node()?.map(|n| n.url);
        *self.primary_url.lock() = url;
        Ok(())
    }
}

impl<C> PendingResourceSource for PolicySet<C>
where
    C: ResourceCatalog + NodeDirectory,
{
    fn next_batch(&self, max_size: usize) -> Result<Vec<Resource>, DispatchError> {
        let Some(node) = self.replicating_node()? else {
            return Ok(Vec::new());
        };
        self.refresh_primary()?;

        let mut per_type: Vec<VecDeque<Resource>> = Vec::with_capacity(self.policies.len());
        for policy in &self.policies {
            per_type.push(policy.pending(&self.catalog, &node, max_size)?.into());
        }

        let start = if per_type.is_empty() {
            0
        } else {
            self.rotation.fetch_add(1, Ordering::Relaxed) % per_type.len()
        };
        let batch = interleave(per_type, start, max_size);
        tracing::debug!(
            node = node.id,
            selective = node.is_selective(),
            size = batch.len(),
            max_size,
            "pending batch loaded"
        );
        Ok(batch)
    }
}

impl<C> ResourceDispatchPolicy for PolicySet<C>
where
    C: ResourceCatalog + NodeDirectory,
{
    fn node_active(&self) -> Result<bool, DispatchError> {
        Ok(self.replicating_node()?.is_some())
    }

    fn build_job(&self, resource: &Resource) -> Result<TransferJob, DispatchError> {
        let guard = self.primary_url.lock();
        let Some(primary_url) = guard.as_deref() else {
            return Err(DispatchError::Dispatch("no primary node registered".into()));
        };
        Ok(TypePolicy::for_type(resource.key.resource_type).transfer_job(resource, primary_url))
    }
}

/// Round-robin merge of per-type queues starting at queue `start`.
fn interleave(mut queues: Vec<VecDeque<Resource>>, start: usize, max: usize) -> Vec<Resource> {
    let mut out = Vec::with_capacity(max.min(queues.iter().map(VecDeque::len).sum()));
    let n = queues.len();
    if n == 0 {
        return out;
    }
    let mut i = start % n;
    let mut idle = 0;
    while out.len() < max && idle < n {
        match queues[i].pop_front() {
            Some(r) => {
                out.push(r);
                idle = 0;
            }
            None => idle += 1,
        }
        i = (i + 1) % n;
    }
    out
}
