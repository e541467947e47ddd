//! Job dispatch: fire-and-forget transfer jobs and their completion signal.
//!
//! The scheduler hands each admitted resource to a [`JobDispatcher`] together
//! with a [`CompletionNotifier`]. Whoever executes the job must, once it
//! finishes, record the outcome in the registry and then call
//! [`CompletionNotifier::finished`]. Registry first: a resource must never be
//! observed as "not in flight" while still lacking its synced record.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::core::model::{JobOutcome, RegistryRecord, ResourceKey};
use crate::core::DispatchError;
use crate::util::clock::now_ms;

/// Abstraction for spawning job execution on a runtime.
pub trait Spawn {
    /// Spawn a detached future.
    fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static;
}

/// Where a job pulls bytes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferTarget {
    /// Primary node base URL.
    pub primary_url: String,
    /// Type-specific transfer path on the primary.
    pub path: String,
}

impl TransferTarget {
    /// Full URL of the transfer endpoint.
    pub fn url(&self) -> String {
        format!("{}{}", self.primary_url.trim_end_matches('/'), self.path)
    }
}

/// Unit of work handed to the job pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferJob {
    /// Resource to replicate.
    pub key: ResourceKey,
    /// Size hint in bytes.
    pub size_bytes: u64,
    /// Transfer source.
    pub target: TransferTarget,
}

/// Receipt for an enqueued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobHandle {
    /// Unique job id.
    pub job_id: Uuid,
    /// Resource the job replicates.
    pub key: ResourceKey,
}

impl JobHandle {
    /// Fresh handle for `key`.
    pub fn new(key: ResourceKey) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            key,
        }
    }
}

/// Completion message delivered back to the running scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobCompletion {
    /// Resource whose job finished.
    pub key: ResourceKey,
    /// How it finished.
    pub outcome: JobOutcome,
}

/// Sending half of a run's completion channel (`onJobFinished`).
///
/// Cheap to clone. Sending after the run has ended is silently dropped: jobs
/// outlive the run that admitted them.
#[derive(Debug, Clone)]
pub struct CompletionNotifier {
    tx: mpsc::UnboundedSender<JobCompletion>,
}

impl CompletionNotifier {
    /// Create a notifier and the receiver the scheduler drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<JobCompletion>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report that the job for `key` finished with `outcome`.
    pub fn finished(&self, key: ResourceKey, outcome: JobOutcome) {
        if self.tx.send(JobCompletion { key, outcome }).is_err() {
            tracing::debug!(resource = %key, "completion arrived after run ended");
        }
    }
}

/// Fire-and-forget job submission.
pub trait JobDispatcher: Send + Sync {
    /// Enqueue a transfer. An `Err` means the job was never queued and the
    /// resource stays eligible.
    fn enqueue(
        &self,
        job: TransferJob,
        notifier: CompletionNotifier,
    ) -> Result<JobHandle, DispatchError>;
}

impl<T: JobDispatcher + ?Sized> JobDispatcher for Arc<T> {
    fn enqueue(
        &self,
        job: TransferJob,
        notifier: CompletionNotifier,
    ) -> Result<JobHandle, DispatchError> {
        (**self).enqueue(job, notifier)
    }
}

/// Registry write side, used by job executors to mark completion.
pub trait RegistryStore: Send + Sync {
    /// Fold `outcome` into the resource's registry record.
    fn record_outcome(
        &self,
        key: ResourceKey,
        outcome: &JobOutcome,
        now_ms: u128,
    ) -> Result<RegistryRecord, DispatchError>;
    /// Clear a permanent failure so the resource becomes eligible again.
    fn clear_failure(&self, key: ResourceKey) -> Result<bool, DispatchError>;
}

impl<T: RegistryStore + ?Sized> RegistryStore for Arc<T> {
    fn record_outcome(
        &self,
        key: ResourceKey,
        outcome: &JobOutcome,
        now_ms: u128,
    ) -> Result<RegistryRecord, DispatchError> {
        (**self).record_outcome(key, outcome, now_ms)
    }

    fn clear_failure(&self, key: ResourceKey) -> Result<bool, DispatchError> {
        (**self).clear_failure(key)
    }
}

/// Performs the actual byte transfer for one resource.
///
/// Implementations must be idempotent: a resource can be transferred twice
/// when a crashed run's lease expires before its jobs report back.
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct HttpTransfer { client: reqwest::Client }
///
/// #[async_trait]
/// impl TransferExecutor for HttpTransfer {
///     async fn transfer(&self, job: &TransferJob) -> JobOutcome {
///         match self.client.get(job.target.url()).send().await {
///             Ok(r) if r.status().is_success() => JobOutcome::Success,
///             Ok(r) if r.status().as_u16() == 404 => {
///                 JobOutcome::PermanentFailure("missing on primary".into())
///             }
///             Ok(r) => JobOutcome::TransientFailure(r.status().to_string()),
///             Err(e) => JobOutcome::TransientFailure(e.to_string()),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait TransferExecutor: Send + Sync + Clone + 'static {
    /// Run the transfer and classify the result.
    async fn transfer(&self, job: &TransferJob) -> JobOutcome;
}

/// Job pool that runs a [`TransferExecutor`] on a [`Spawn`] runtime.
///
/// On completion it writes the registry, then signals the notifier.
pub struct SpawnDispatcher<S, X, R> {
    spawner: S,
    executor: X,
    registry: Arc<R>,
}

impl<S, X, R> SpawnDispatcher<S, X, R>
where
    S: Spawn + Send + Sync,
    X: TransferExecutor,
    R: RegistryStore + 'static,
{
    /// Create a dispatcher.
    pub fn new(spawner: S, executor: X, registry: Arc<R>) -> Self {
        Self {
            spawner,
            executor,
            registry,
        }
    }
}

impl<S, X, R> JobDispatcher for SpawnDispatcher<S, X, R>
where
    S: Spawn + Send + Sync,
    X: TransferExecutor,
    R: RegistryStore + 'static,
{
    fn enqueue(
        &self,
        job: TransferJob,
        notifier: CompletionNotifier,
    ) -> Result<JobHandle, DispatchError> {
        let handle = JobHandle::new(job.key);
        let executor = self.executor.clone();
        let registry = Arc::clone(&self.registry);

        self.spawner.spawn(async move {
            tracing::debug!(resource = %job.key, url = %job.target.url(), "transfer started");
            let outcome = executor.transfer(&job).await;

            if let Err(e) = registry.record_outcome(job.key, &outcome, now_ms()) {
                tracing::error!(resource = %job.key, "failed to record outcome: {e}");
            }
            match &outcome {
                JobOutcome::Success => tracing::info!(resource = %job.key, "transfer finished"),
                JobOutcome::TransientFailure(e) => {
                    tracing::warn!(resource = %job.key, "transfer failed, will retry: {e}");
                }
                JobOutcome::PermanentFailure(e) => {
                    tracing::error!(resource = %job.key, "transfer failed permanently: {e}");
                }
            }

            notifier.finished(job.key, outcome);
        });

        Ok(handle)
    }
}
