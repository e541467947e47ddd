//! Cumulative scheduler counters exposed for external monitoring.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::core::scheduler::{RunOutcome, RunReport};

/// Thread-safe counters accumulated across runs.
#[derive(Debug, Default)]
pub struct SchedulerMetrics {
    runs_started: AtomicU64,
    runs_completed: AtomicU64,
    node_inactive: AtomicU64,
    lease_contended: AtomicU64,
    lease_lost: AtomicU64,
    time_budget_exceeded: AtomicU64,
    source_failures: AtomicU64,
    cancelled: AtomicU64,
    batches_queried: AtomicU64,
    resources_admitted: AtomicU64,
    dispatch_failures: AtomicU64,
    completions: AtomicU64,
    last_run_duration_ms: AtomicU64,
}

/// Point-in-time copy of [`SchedulerMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Runs triggered.
    pub runs_started: u64,
    /// Runs that drained the backlog.
    pub runs_completed: u64,
    /// Runs skipped because the node was not an enabled secondary.
    pub node_inactive: u64,
    /// Runs skipped because another runner held the lease.
    pub lease_contended: u64,
    /// Runs ended by a failed lease renewal.
    pub lease_lost: u64,
    /// Runs ended by the time budget.
    pub time_budget_exceeded: u64,
    /// Runs ended by a catalog or lease store failure.
    pub source_failures: u64,
    /// Runs ended by external cancellation.
    pub cancelled: u64,
    /// Backlog queries issued.
    pub batches_queried: u64,
    /// Jobs dispatched.
    pub resources_admitted: u64,
    /// Enqueue calls that failed.
    pub dispatch_failures: u64,
    /// Completion signals observed by the run that admitted the job.
    pub completions: u64,
    /// Duration of the most recent run in milliseconds.
    pub last_run_duration_ms: u64,
}

impl SchedulerMetrics {
    /// Fresh zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn run_started(&self) {
        self.runs_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Fold a finished run into the counters.
    pub(crate) fn record_run(&self, report: &RunReport) {
        let counter = match report.outcome {
            RunOutcome::Completed => &self.runs_completed,
            RunOutcome::NodeInactive => &self.node_inactive,
            RunOutcome::LeaseContended => &self.lease_contended,
            RunOutcome::LeaseLost => &self.lease_lost,
            RunOutcome::TimeBudgetExceeded => &self.time_budget_exceeded,
            RunOutcome::SourceFailed(_) | RunOutcome::LeaseFailed(_) => &self.source_failures,
            RunOutcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.batches_queried
            .fetch_add(report.batches_queried, Ordering::Relaxed);
        self.resources_admitted
            .fetch_add(report.admitted.len() as u64, Ordering::Relaxed);
        self.dispatch_failures
            .fetch_add(report.dispatch_failures, Ordering::Relaxed);
        self.completions
            .fetch_add(report.completions, Ordering::Relaxed);
        self.last_run_duration_ms.store(
            u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            Ordering::Relaxed,
        );
    }

    /// Get a snapshot of current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            runs_started: self.runs_started.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            node_inactive: self.node_inactive.load(Ordering::Relaxed),
            lease_contended: self.lease_contended.load(Ordering::Relaxed),
            lease_lost: self.lease_lost.load(Ordering::Relaxed),
            time_budget_exceeded: self.time_budget_exceeded.load(Ordering::Relaxed),
            source_failures: self.source_failures.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            batches_queried: self.batches_queried.load(Ordering::Relaxed),
            resources_admitted: self.resources_admitted.load(Ordering::Relaxed),
            dispatch_failures: self.dispatch_failures.load(Ordering::Relaxed),
            completions: self.completions.load(Ordering::Relaxed),
            last_run_duration_ms: self.last_run_duration_ms.load(Ordering::Relaxed),
        }
    }
}
