//! Recurring trigger for scheduler runs.
//!
//! Runs are awaited one at a time, so a tick that fires while a run is still
//! going is skipped rather than queued. Overlap between processes is handled
//! by the run lease, not here.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::core::{
    DispatchScheduler, JobDispatcher, LeaseStore, ResourceDispatchPolicy, RunOutcome, RunReport,
};

/// Totals for a trigger loop.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSummary {
    /// Runs started.
    pub runs: u64,
    /// Runs that drained the backlog.
    pub completed: u64,
    /// Resources dispatched across all runs.
    pub admitted: u64,
    /// Outcome of the most recent run.
    pub last_outcome: Option<RunOutcome>,
}

impl TriggerSummary {
    fn record(&mut self, report: &RunReport) {
        self.runs += 1;
        if report.outcome == RunOutcome::Completed {
            self.completed += 1;
        }
        self.admitted += report.admitted.len() as u64;
        self.last_outcome = Some(report.outcome.clone());
    }
}

/// Drives [`DispatchScheduler::run`] on a fixed period until cancelled.
pub struct PeriodicTrigger {
    period: Duration,
    cancel: CancellationToken,
    max_runs: Option<u64>,
}

impl PeriodicTrigger {
    /// Trigger every `period`; the first run starts immediately.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            cancel: CancellationToken::new(),
            max_runs: None,
        }
    }

    /// Stop when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Stop after `max_runs` runs.
    #[must_use]
    pub const fn with_max_runs(mut self, max_runs: u64) -> Self {
        self.max_runs = Some(max_runs);
        self
    }

    /// Token that stops the loop.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the loop. Returns once cancelled or after `max_runs`.
    pub async fn run<P, D, L>(&self, scheduler: &DispatchScheduler<P, D, L>) -> TriggerSummary
    where
        P: ResourceDispatchPolicy,
        D: JobDispatcher,
        L: LeaseStore + Clone,
    {
        let mut summary = TriggerSummary::default();
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            if self.max_runs.is_some_and(|max| summary.runs >= max) {
                break;
            }
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let report = scheduler.run().await;
            summary.record(&report);
            tracing::debug!(
                identity = scheduler.identity(),
                runs = summary.runs,
                outcome = ?report.outcome,
                "triggered run finished"
            );
        }

        tracing::info!(runs = summary.runs, admitted = summary.admitted, "trigger loop stopped");
        summary
    }
}
