//! Core scheduling abstractions: lease, backlog source, policy, and the dispatch loop.

pub mod audit;
pub mod dispatch;
pub mod error;
pub mod in_flight;
pub mod lease;
pub mod metrics;
pub mod model;
pub mod policy;
pub mod scheduler;
pub mod source;

pub use audit::{build_audit_event, AuditEvent, AuditSink, InMemoryAuditSink};
pub use dispatch::{
    CompletionNotifier, JobCompletion, JobDispatcher, JobHandle, RegistryStore, Spawn,
    SpawnDispatcher, TransferExecutor, TransferJob, TransferTarget,
};
pub use error::{AppResult, DispatchError};
pub use in_flight::{Admission, InFlightSet};
pub use lease::{ExclusiveRunLock, LeaseRecord, LeaseStore};
pub use metrics::{MetricsSnapshot, SchedulerMetrics};
pub use model::{
    JobOutcome, NamespaceId, Node, NodeRole, Owner, ProjectId, RegistryRecord, RegistryState,
    Resource, ResourceKey, ResourceType, retry_backoff,
};
pub use policy::{PolicySet, ResourceDispatchPolicy, TypePolicy};
pub use scheduler::{DispatchScheduler, RunOutcome, RunReport, SchedulerLimits, SchedulerState};
pub use source::{NodeDirectory, NodeFilter, PendingResourceSource, ResourceCatalog};
