//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use replica_dispatch::core::{
    CompletionNotifier, DispatchError, DispatchScheduler, JobDispatcher, JobHandle, JobOutcome,
    LeaseRecord, LeaseStore, Node, Owner, PolicySet, RegistryStore, Resource, ResourceKey,
    ResourceType, SchedulerLimits, TransferExecutor, TransferJob,
};
use replica_dispatch::infra::{InMemoryCatalog, InMemoryLeaseStore};
use replica_dispatch::util::clock::now_ms;

pub const PRIMARY_URL: &str = "http://primary.example";
pub const IDENTITY: &str = "file_download_dispatch";

/// Catalog with a primary (id 1) and the current node as an enabled secondary (id 2).
pub fn catalog_with(secondary: Node) -> Arc<InMemoryCatalog> {
    let catalog = Arc::new(InMemoryCatalog::new());
    catalog.add_node(Node::primary(1, PRIMARY_URL));
    let id = secondary.id;
    catalog.add_node(secondary);
    catalog.set_current_node(id);
    catalog
}

pub fn catalog_with_secondary() -> Arc<InMemoryCatalog> {
    catalog_with(Node::secondary(2, "http://secondary.example"))
}

pub fn blob_key(id: u64) -> ResourceKey {
    ResourceKey::new(ResourceType::Blob, id)
}

pub fn blobs(ids: impl IntoIterator<Item = u64>) -> Vec<Resource> {
    ids.into_iter()
        .map(|id| Resource::new(blob_key(id), 1024, Owner::Unowned))
        .collect()
}

/// Dispatcher that finishes each job inside `enqueue`: registry first, then
/// the completion signal.
pub struct InlineDispatcher {
    registry: Arc<InMemoryCatalog>,
    failing: HashSet<ResourceKey>,
    outcomes: HashMap<ResourceKey, JobOutcome>,
    jobs: Mutex<Vec<TransferJob>>,
}

impl InlineDispatcher {
    pub fn new(registry: Arc<InMemoryCatalog>) -> Self {
        Self {
            registry,
            failing: HashSet::new(),
            outcomes: HashMap::new(),
            jobs: Mutex::new(Vec::new()),
        }
    }

    /// Refuse to enqueue `key`.
    pub fn failing(mut self, key: ResourceKey) -> Self {
        self.failing.insert(key);
        self
    }

    /// Finish `key` with `outcome` instead of success.
    pub fn with_outcome(mut self, key: ResourceKey, outcome: JobOutcome) -> Self {
        self.outcomes.insert(key, outcome);
        self
    }

    pub fn jobs(&self) -> Vec<TransferJob> {
        self.jobs.lock().clone()
    }

    pub fn enqueued_keys(&self) -> Vec<ResourceKey> {
        self.jobs.lock().iter().map(|j| j.key).collect()
    }
}

impl JobDispatcher for InlineDispatcher {
    fn enqueue(
        &self,
        job: TransferJob,
        notifier: CompletionNotifier,
    ) -> Result<JobHandle, DispatchError> {
        if self.failing.contains(&job.key) {
            return Err(DispatchError::Dispatch(format!("queue rejected {}", job.key)));
        }
        let key = job.key;
        let outcome = self.outcomes.get(&key).cloned().unwrap_or(JobOutcome::Success);
        self.jobs.lock().push(job);
        self.registry.record_outcome(key, &outcome, now_ms())?;
        notifier.finished(key, outcome);
        Ok(JobHandle::new(key))
    }
}

/// Executor that sleeps, then succeeds, tracking how many transfers overlap.
#[derive(Clone)]
pub struct SlowTransfer {
    delay: Duration,
    running: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
    seen: Arc<Mutex<Vec<ResourceKey>>>,
}

impl SlowTransfer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            running: Arc::new(AtomicUsize::new(0)),
            peak: Arc::new(AtomicUsize::new(0)),
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<ResourceKey> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl TransferExecutor for SlowTransfer {
    async fn transfer(&self, job: &TransferJob) -> JobOutcome {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.seen.lock().push(job.key);
        JobOutcome::Success
    }
}

/// Executor whose transfer of resource `id` takes `step * id`, so completions
/// arrive in id order at predictable instants.
#[derive(Clone)]
pub struct StaggeredTransfer {
    step: Duration,
}

impl StaggeredTransfer {
    pub fn new(step: Duration) -> Self {
        Self { step }
    }
}

#[async_trait]
impl TransferExecutor for StaggeredTransfer {
    async fn transfer(&self, job: &TransferJob) -> JobOutcome {
        let factor = u32::try_from(job.key.id).unwrap_or(u32::MAX);
        tokio::time::sleep(self.step.saturating_mul(factor)).await;
        JobOutcome::Success
    }
}

/// Lease store that counts calls and can refuse renewals.
#[derive(Default)]
pub struct CountingLeaseStore {
    inner: InMemoryLeaseStore,
    pub acquires: AtomicUsize,
    pub renewals: AtomicUsize,
    refuse_renewals: bool,
}

impl CountingLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn refusing_renewals() -> Self {
        Self {
            refuse_renewals: true,
            ..Self::default()
        }
    }

    pub fn acquire_calls(&self) -> usize {
        self.acquires.load(Ordering::SeqCst)
    }

    pub fn renew_calls(&self) -> usize {
        self.renewals.load(Ordering::SeqCst)
    }
}

impl LeaseStore for CountingLeaseStore {
    fn try_acquire(
        &self,
        identity: &str,
        holder: &str,
        ttl: Duration,
    ) -> Result<bool, DispatchError> {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.inner.try_acquire(identity, holder, ttl)
    }

    fn renew(&self, identity: &str, holder: &str, ttl: Duration) -> Result<bool, DispatchError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        if self.refuse_renewals {
            return Ok(false);
        }
        self.inner.renew(identity, holder, ttl)
    }

    fn release(&self, identity: &str, holder: &str) -> Result<(), DispatchError> {
        self.inner.release(identity, holder)
    }

    fn current(&self, identity: &str) -> Result<Option<LeaseRecord>, DispatchError> {
        self.inner.current(identity)
    }
}

pub type InlineScheduler = DispatchScheduler<
    PolicySet<Arc<InMemoryCatalog>>,
    Arc<InlineDispatcher>,
    Arc<CountingLeaseStore>,
>;

/// Scheduler over `catalog` with an inline dispatcher and a counting lease store.
pub fn inline_scheduler(
    catalog: &Arc<InMemoryCatalog>,
    limits: SchedulerLimits,
    types: impl IntoIterator<Item = ResourceType>,
    dispatcher: InlineDispatcher,
) -> (InlineScheduler, Arc<InlineDispatcher>, Arc<CountingLeaseStore>) {
    let dispatcher = Arc::new(dispatcher);
    let lease = Arc::new(CountingLeaseStore::new());
    let scheduler = DispatchScheduler::new(
        IDENTITY,
        limits,
        PolicySet::new(Arc::clone(catalog), types),
        Arc::clone(&dispatcher),
        Arc::clone(&lease),
    );
    (scheduler, dispatcher, lease)
}
