//! In-memory catalog used by tests, benches, and single-process setups.
//!
//! Implements the read side the scheduler queries ([`ResourceCatalog`],
//! [`NodeDirectory`]) and the write side job executors report to
//! ([`RegistryStore`]), so a transfer finishing immediately removes its
//! resource from the next backlog query.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::core::{
    DispatchError, JobOutcome, NamespaceId, Node, NodeDirectory, NodeFilter, NodeRole, Owner,
    RegistryRecord, RegistryState, RegistryStore, Resource, ResourceCatalog, ResourceKey,
};
use crate::util::clock::now_ms;

#[derive(Default)]
struct CatalogState {
    current_node: Option<u64>,
    nodes: BTreeMap<u64, Node>,
    namespace_parents: HashMap<NamespaceId, Option<NamespaceId>>,
    resources: BTreeMap<ResourceKey, Resource>,
    registry: HashMap<ResourceKey, RegistryRecord>,
}

impl CatalogState {
    /// Namespaces in `roots` plus every namespace nested below them.
    fn expand(&self, roots: &std::collections::BTreeSet<NamespaceId>) -> HashSet<NamespaceId> {
        let mut allowed: HashSet<NamespaceId> = roots.iter().copied().collect();
        for &ns in self.namespace_parents.keys() {
            if self.has_ancestor_in(ns, roots) {
                allowed.insert(ns);
            }
        }
        allowed
    }

    fn has_ancestor_in(
        &self,
        ns: NamespaceId,
        roots: &std::collections::BTreeSet<NamespaceId>,
    ) -> bool {
        let mut cursor = Some(ns);
        // Bounded walk: a malformed parent cycle must not hang the query.
        for _ in 0..=self.namespace_parents.len() {
            let Some(current) = cursor else {
                return false;
            };
            if roots.contains(&current) {
                return true;
            }
            cursor = self.namespace_parents.get(&current).copied().flatten();
        }
        false
    }

    fn is_excluded(&self, key: &ResourceKey, now_ms: u128) -> bool {
        self.registry
            .get(key)
            .is_some_and(|record| record.excludes_from_backlog_at(now_ms))
    }
}

fn owner_allowed(owner: &Owner, allowed: Option<&HashSet<NamespaceId>>) -> bool {
    let Some(allowed) = allowed else {
        return true;
    };
    match owner {
        Owner::Project { namespace_id, .. } => allowed.contains(namespace_id),
        Owner::Namespace(ns) => allowed.contains(ns),
        Owner::Unowned => true,
    }
}

/// Catalog held entirely in memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<CatalogState>,
    queries: AtomicU64,
    unavailable: AtomicBool,
}

impl InMemoryCatalog {
    /// Empty catalog with no nodes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a node.
    pub fn add_node(&self, node: Node) {
        self.state.write().nodes.insert(node.id, node);
    }

    /// Mark which registered node this process runs as.
    pub fn set_current_node(&self, id: u64) {
        self.state.write().current_node = Some(id);
    }

    /// Mutate a registered node in place. Returns false when unknown.
    pub fn update_node(&self, id: u64, f: impl FnOnce(&mut Node)) -> bool {
        self.state.write().nodes.get_mut(&id).map(f).is_some()
    }

    /// Register a namespace under an optional parent.
    pub fn add_namespace(&self, id: NamespaceId, parent: Option<NamespaceId>) {
        self.state.write().namespace_parents.insert(id, parent);
    }

    /// Add (or replace) a resource.
    pub fn add_resource(&self, resource: Resource) {
        self.state.write().resources.insert(resource.key, resource);
    }

    /// Add many resources.
    pub fn add_resources(&self, resources: impl IntoIterator<Item = Resource>) {
        let mut state = self.state.write();
        for r in resources {
            state.resources.insert(r.key, r);
        }
    }

    /// Registry record for `key`, if any.
    pub fn registry(&self, key: &ResourceKey) -> Option<RegistryRecord> {
        self.state.read().registry.get(key).cloned()
    }

    /// Number of resources recorded as synced.
    pub fn synced_count(&self) -> usize {
        self.state
            .read()
            .registry
            .values()
            .filter(|r| matches!(r.state, RegistryState::Synced { .. }))
            .count()
    }

    /// Number of `list_eligible` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    /// Make every query fail, simulating a database outage.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), DispatchError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(DispatchError::Catalog("catalog unavailable".into()));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), DispatchError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(DispatchError::Registry("registry unavailable".into()));
        }
        Ok(())
    }
}

impl ResourceCatalog for InMemoryCatalog {
    fn list_eligible(
        &self,
        filter: &NodeFilter,
        limit: usize,
    ) -> Result<Vec<Resource>, DispatchError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        self.check_available()?;

        let now = now_ms();
        let state = self.state.read();
        let allowed = filter.is_restricted().then(|| state.expand(&filter.namespaces));
        Ok(state
            .resources
            .values()
            .filter(|r| r.key.resource_type == filter.resource_type)
            .filter(|r| owner_allowed(&r.owner, allowed.as_ref()))
            .filter(|r| !state.is_excluded(&r.key, now))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl NodeDirectory for InMemoryCatalog {
    fn current_node(&self) -> Result<Option<Node>, DispatchError> {
        self.check_available()?;
        let state = self.state.read();
        Ok(state.current_node.and_then(|id| state.nodes.get(&id).cloned()))
    }

    fn primary_node(&self) -> Result<Option<Node>, DispatchError> {
        self.check_available()?;
        Ok(self
            .state
            .read()
            .nodes
            .values()
            .find(|n| n.role == NodeRole::Primary)
            .cloned())
    }
}

impl RegistryStore for InMemoryCatalog {
    fn record_outcome(
        &self,
        key: ResourceKey,
        outcome: &JobOutcome,
        now_ms: u128,
    ) -> Result<RegistryRecord, DispatchError> {
        self.check_writable()?;
        let mut state = self.state.write();
        let next = RegistryRecord::apply(state.registry.get(&key), key, outcome, now_ms);
        state.registry.insert(key, next.clone());
        Ok(next)
    }

    fn clear_failure(&self, key: ResourceKey) -> Result<bool, DispatchError> {
        self.check_writable()?;
        let mut state = self.state.write();
        let failed = state
            .registry
            .get(&key)
            .is_some_and(|r| matches!(r.state, RegistryState::Failed { .. }));
        if failed {
            state.registry.remove(&key);
        }
        Ok(failed)
    }
}
