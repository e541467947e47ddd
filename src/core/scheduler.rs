//! Bounded-capacity, time-boxed dispatch loop.
//!
//! A run moves through `Idle → Acquiring → Running ⇄ Draining → Done`:
//!
//! - **Acquiring**: the node must be an enabled secondary and the run lease
//!   must be free; otherwise the run ends immediately with no side effects.
//! - **Running**: the loop keeps a local buffer of pending resources and
//!   reloads it from the source whenever it holds fewer than `max_capacity`
//!   entries and a slot is free. A reload smaller than `max_capacity` marks
//!   the source as exhausted and moves the run to Draining.
//! - **Draining**: the loop waits for completions instead of polling, and
//!   re-queries only once free capacity reaches `drain_refill_watermark`.
//!   A non-empty reload resumes Running; an empty in-flight set after an
//!   undersized reload ends the run.
//!
//! Every iteration begins with a single stop check (time budget, external
//! cancellation) and ends with a lease renewal when due; a refused renewal
//! ends the run at once without releasing, since someone else owns the lease.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::audit::{build_audit_event, AuditSink};
use crate::core::dispatch::{CompletionNotifier, JobCompletion, JobDispatcher};
use crate::core::in_flight::{Admission, InFlightSet};
use crate::core::lease::{ExclusiveRunLock, LeaseStore};
use crate::core::metrics::SchedulerMetrics;
use crate::core::model::{JobOutcome, Resource, ResourceKey};
use crate::core::policy::ResourceDispatchPolicy;

/// Numeric limits for one scheduler identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerLimits {
    /// Maximum jobs in flight at once.
    pub max_capacity: usize,
    /// Size of each backlog query.
    pub batch_size: usize,
    /// Lease time-to-live.
    pub lease_ttl: Duration,
    /// How often the lease is renewed; zero renews every iteration.
    pub lease_renew_interval: Duration,
    /// Soft deadline after which no new work is admitted.
    pub run_budget: Duration,
    /// Free slots required before a draining run re-queries the source.
    pub drain_refill_watermark: usize,
}

impl SchedulerLimits {
    /// Limits with the given capacity and batch size, and a watermark of
    /// half the capacity (rounded up).
    pub fn new(max_capacity: usize, batch_size: usize) -> Self {
        Self {
            max_capacity,
            batch_size,
            lease_ttl: Duration::from_secs(3600),
            lease_renew_interval: Duration::from_secs(60),
            run_budget: Duration::from_secs(3600),
            drain_refill_watermark: max_capacity.div_ceil(2).max(1),
        }
    }

    /// Override the run budget.
    #[must_use]
    pub const fn with_run_budget(mut self, budget: Duration) -> Self {
        self.run_budget = budget;
        self
    }

    /// Override the lease TTL and renewal interval.
    #[must_use]
    pub const fn with_lease(mut self, ttl: Duration, renew_interval: Duration) -> Self {
        self.lease_ttl = ttl;
        self.lease_renew_interval = renew_interval;
        self
    }

    /// Override the draining refill watermark.
    #[must_use]
    pub const fn with_drain_refill_watermark(mut self, watermark: usize) -> Self {
        self.drain_refill_watermark = watermark;
        self
    }
}

/// Scheduler run states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    /// Not running.
    Idle,
    /// Checking the node and taking the lease.
    Acquiring,
    /// Admitting work from the source.
    Running,
    /// Source looked exhausted; waiting for in-flight jobs.
    Draining,
    /// Run over.
    Done,
}

/// Why a run ended. None of these is a crash; the next trigger starts over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Backlog drained and no jobs left in flight.
    Completed,
    /// Node missing, disabled, or not a secondary.
    NodeInactive,
    /// Another runner holds the lease.
    LeaseContended,
    /// Renewal refused mid-run.
    LeaseLost,
    /// Time budget exceeded; admitted jobs keep running.
    TimeBudgetExceeded,
    /// Cancellation token fired.
    Cancelled,
    /// Catalog query failed.
    SourceFailed(String),
    /// Lease store failed during acquisition.
    LeaseFailed(String),
}

/// Per-run observability record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Run identifier.
    pub run_id: String,
    /// Scheduler identity.
    pub identity: String,
    /// Why the run ended.
    pub outcome: RunOutcome,
    /// State the run was in when it ended.
    pub exit_state: SchedulerState,
    /// Whether this run held the lease at some point.
    pub lease_acquired: bool,
    /// Backlog queries issued.
    pub batches_queried: u64,
    /// Resources dispatched, in admission order.
    pub admitted: Vec<ResourceKey>,
    /// Enqueue calls that failed.
    pub dispatch_failures: u64,
    /// Completions observed during the run.
    pub completions: u64,
    /// Largest in-flight set size observed.
    pub peak_in_flight: usize,
    /// Jobs still in flight when the run ended.
    pub left_in_flight: usize,
    /// Wall time of the run.
    pub duration: Duration,
}

/// Run-scoped bookkeeping, owned by one invocation of [`DispatchScheduler::run`].
struct RunContext {
    run_id: String,
    started: Instant,
    deadline: Instant,
    state: SchedulerState,
    lease_acquired: bool,
    batches_queried: u64,
    admitted: Vec<ResourceKey>,
    dispatch_failures: u64,
    completions: u64,
    peak_in_flight: usize,
    left_in_flight: usize,
}

impl RunContext {
    fn new(run_budget: Duration) -> Self {
        let started = Instant::now();
        Self {
            run_id: Uuid::new_v4().to_string(),
            started,
            deadline: started + run_budget,
            state: SchedulerState::Idle,
            lease_acquired: false,
            batches_queried: 0,
            admitted: Vec::new(),
            dispatch_failures: 0,
            completions: 0,
            peak_in_flight: 0,
            left_in_flight: 0,
        }
    }

    fn over_time(&self) -> bool {
        Instant::now() >= self.deadline
    }

    fn transition(&mut self, next: SchedulerState) {
        if self.state != next {
            tracing::debug!(
                run_id = %self.run_id,
                from = ?self.state,
                to = ?next,
                "state transition"
            );
            self.state = next;
        }
    }

    fn into_report(
        self,
        identity: &str,
        outcome: RunOutcome,
        exit_state: SchedulerState,
    ) -> RunReport {
        RunReport {
            run_id: self.run_id,
            identity: identity.to_string(),
            outcome,
            exit_state,
            lease_acquired: self.lease_acquired,
            batches_queried: self.batches_queried,
            admitted: self.admitted,
            dispatch_failures: self.dispatch_failures,
            completions: self.completions,
            peak_in_flight: self.peak_in_flight,
            left_in_flight: self.left_in_flight,
            duration: self.started.elapsed(),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct AdmitTally {
    admitted: usize,
    failed: usize,
}

/// Replication dispatch scheduler for one identity.
///
/// Generic over the policy layer `P` (backlog + job construction), the job
/// dispatcher `D`, and the lease store `L`. Every call to [`run`](Self::run)
/// uses a fresh lease holder token, so two overlapping runs contend even
/// when they share one scheduler value.
pub struct DispatchScheduler<P, D, L> {
    identity: String,
    limits: SchedulerLimits,
    policy: P,
    dispatcher: D,
    lease_store: L,
    metrics: Arc<SchedulerMetrics>,
    cancel: CancellationToken,
    audit: Option<Arc<Mutex<Box<dyn AuditSink>>>>,
}

impl<P, D, L> DispatchScheduler<P, D, L>
where
    P: ResourceDispatchPolicy,
    D: JobDispatcher,
    L: LeaseStore + Clone,
{
    /// Create a scheduler from components.
    pub fn new(
        identity: impl Into<String>,
        limits: SchedulerLimits,
        policy: P,
        dispatcher: D,
        lease_store: L,
    ) -> Self {
        Self {
            identity: identity.into(),
            limits,
            policy,
            dispatcher,
            lease_store,
            metrics: Arc::new(SchedulerMetrics::new()),
            cancel: CancellationToken::new(),
            audit: None,
        }
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: Box<dyn AuditSink>) -> Self {
        self.audit = Some(Arc::new(Mutex::new(audit)));
        self
    }

    /// Share a metrics registry.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Stop runs when `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Scheduler identity (the lease key).
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Configured limits.
    pub const fn limits(&self) -> &SchedulerLimits {
        &self.limits
    }

    /// Cumulative metrics.
    pub fn metrics(&self) -> Arc<SchedulerMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Policy layer.
    pub const fn policy(&self) -> &P {
        &self.policy
    }

    /// Token that cancels runs of this scheduler.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Execute one scheduler run. Never fails: the outcome is in the report.
    pub async fn run(&self) -> RunReport {
        let mut ctx = RunContext::new(self.limits.run_budget);
        let span =
            tracing::info_span!("dispatch_run", identity = %self.identity, run_id = %ctx.run_id);
        self.metrics.run_started();

        let outcome = self.run_inner(&mut ctx).instrument(span.clone()).await;
        let exit_state = ctx.state;
        span.in_scope(|| ctx.transition(SchedulerState::Done));

        let report = ctx.into_report(&self.identity, outcome, exit_state);
        self.metrics.record_run(&report);
        self.audit(&report.run_id, "run_end", None, Some(format!("{:?}", report.outcome)));
        span.in_scope(|| {
            tracing::info!(
                outcome = ?report.outcome,
                admitted = report.admitted.len(),
                batches = report.batches_queried,
                left_in_flight = report.left_in_flight,
                duration_ms = report.duration.as_millis(),
                "run finished"
            );
        });
        report
    }

    async fn run_inner(&self, ctx: &mut RunContext) -> RunOutcome {
        ctx.transition(SchedulerState::Acquiring);

        match self.policy.node_active() {
            Ok(true) => {}
            Ok(false) => {
                tracing::debug!("node is not an enabled secondary, skipping");
                return RunOutcome::NodeInactive;
            }
            Err(e) => {
                tracing::error!("node lookup failed: {e}");
                return RunOutcome::SourceFailed(e.to_string());
            }
        }

        let lock = ExclusiveRunLock::new(self.lease_store.clone(), self.identity.clone());
        match lock.try_acquire(self.limits.lease_ttl) {
            Ok(true) => {
                ctx.lease_acquired = true;
                self.audit(&ctx.run_id, "lease_acquired", None, None);
            }
            Ok(false) => {
                tracing::info!("lease held by another runner, skipping");
                self.audit(&ctx.run_id, "lease_contended", None, None);
                return RunOutcome::LeaseContended;
            }
            Err(e) => {
                tracing::error!("lease acquisition failed: {e}");
                return RunOutcome::LeaseFailed(e.to_string());
            }
        }

        let outcome = self.drive(&lock, ctx).await;

        if outcome != RunOutcome::LeaseLost {
            if let Err(e) = lock.release() {
                tracing::warn!("lease release failed, it will expire: {e}");
            }
        }
        outcome
    }

    async fn drive(&self, lock: &ExclusiveRunLock<L>, ctx: &mut RunContext) -> RunOutcome {
        let (notifier, mut completions) = CompletionNotifier::channel();
        let mut in_flight = InFlightSet::new(self.limits.max_capacity);
        let mut pending: VecDeque<Resource> = VecDeque::new();
        let mut refused: HashSet<ResourceKey> = HashSet::new();
        let mut source_exhausted = false;
        let mut last_renewal = Instant::now();
        ctx.transition(SchedulerState::Running);

        let outcome = loop {
            if let Some(stop) = self.stop_reason(ctx) {
                break stop;
            }

            self.drain_completions(&mut completions, &mut in_flight, ctx);

            match self.policy.node_active() {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!("node deactivated mid-run, stopping admissions");
                    break RunOutcome::NodeInactive;
                }
                Err(e) => break RunOutcome::SourceFailed(e.to_string()),
            }

            let should_query = match ctx.state {
                SchedulerState::Running => {
                    in_flight.available() > 0 && pending.len() < self.limits.max_capacity
                }
                SchedulerState::Draining => {
                    in_flight.available() >= self.limits.drain_refill_watermark
                }
                _ => false,
            };

            if should_query {
                // Over-fetch by the refused count so those keys do not crowd out the rest.
                let limit = self.limits.batch_size.saturating_add(refused.len());
                let batch = match self.policy.next_batch(limit) {
                    Ok(batch) => batch,
                    Err(e) => {
                        tracing::error!("backlog query failed: {e}");
                        break RunOutcome::SourceFailed(e.to_string());
                    }
                };
                ctx.batches_queried += 1;
                let fetched = batch.len();
                pending = batch
                    .into_iter()
                    .filter(|r| !in_flight.contains(&r.key) && !refused.contains(&r.key))
                    .take(self.limits.batch_size)
                    .collect();
                source_exhausted = pending.len() < self.limits.max_capacity;
                tracing::debug!(
                    fetched,
                    fresh = pending.len(),
                    in_flight = in_flight.len(),
                    "backlog queried"
                );
                self.audit(&ctx.run_id, "batch", None, Some(format!("fetched={fetched}")));
            }

            let tally =
                self.admit_pending(&mut pending, &mut in_flight, &mut refused, &notifier, ctx);
            if should_query && tally.admitted == 0 && tally.failed > 0 {
                // A whole batch of fresh keys was refused; treat the queue as down.
                source_exhausted = true;
                pending.clear();
            }

            if should_query {
                ctx.transition(if source_exhausted {
                    SchedulerState::Draining
                } else {
                    SchedulerState::Running
                });
            }

            if source_exhausted && in_flight.is_empty() && pending.is_empty() {
                break RunOutcome::Completed;
            }

            let must_wait = ctx.state == SchedulerState::Draining || in_flight.available() == 0;
            if must_wait {
                if let Some(stop) = self
                    .wait_for_completion(&mut completions, &mut in_flight, ctx, last_renewal)
                    .await
                {
                    break stop;
                }
            }

            if last_renewal.elapsed() >= self.limits.lease_renew_interval {
                match lock.renew(self.limits.lease_ttl) {
                    Ok(true) => last_renewal = Instant::now(),
                    Ok(false) => break RunOutcome::LeaseLost,
                    Err(e) => {
                        tracing::warn!("lease renewal failed, assuming ownership lost: {e}");
                        break RunOutcome::LeaseLost;
                    }
                }
            }
        };

        self.drain_completions(&mut completions, &mut in_flight, ctx);
        ctx.left_in_flight = in_flight.len();
        ctx.peak_in_flight = in_flight.peak();
        if ctx.left_in_flight > 0 {
            tracing::info!(left = ctx.left_in_flight, "run ending with jobs still in flight");
        }
        outcome
    }

    fn stop_reason(&self, ctx: &RunContext) -> Option<RunOutcome> {
        if self.cancel.is_cancelled() {
            return Some(RunOutcome::Cancelled);
        }
        if ctx.over_time() {
            tracing::warn!(
                budget_ms = self.limits.run_budget.as_millis(),
                "run time budget exceeded"
            );
            return Some(RunOutcome::TimeBudgetExceeded);
        }
        None
    }

    /// Move resources from the pending buffer into flight until capacity is
    /// used up. A resource enters the in-flight set only after its enqueue
    /// succeeded; a refused resource is not offered again in this run.
    fn admit_pending(
        &self,
        pending: &mut VecDeque<Resource>,
        in_flight: &mut InFlightSet,
        refused: &mut HashSet<ResourceKey>,
        notifier: &CompletionNotifier,
        ctx: &mut RunContext,
    ) -> AdmitTally {
        let mut tally = AdmitTally::default();
        while in_flight.available() > 0 {
            if ctx.over_time() || self.cancel.is_cancelled() {
                break;
            }
            let Some(resource) = pending.pop_front() else {
                break;
            };
            if in_flight.contains(&resource.key) {
                continue;
            }

            let enqueued = self
                .policy
                .build_job(&resource)
                .and_then(|job| self.dispatcher.enqueue(job, notifier.clone()));
            match enqueued {
                Ok(handle) => {
                    if in_flight.admit(resource.key) == Admission::Admitted {
                        ctx.admitted.push(resource.key);
                        tally.admitted += 1;
                        tracing::debug!(
                            resource = %resource.key,
                            job_id = %handle.job_id,
                            "dispatched"
                        );
                        self.audit(&ctx.run_id, "admit", Some(resource.key), None);
                    }
                }
                Err(e) => {
                    ctx.dispatch_failures += 1;
                    tally.failed += 1;
                    refused.insert(resource.key);
                    tracing::warn!(resource = %resource.key, "enqueue failed, skipping: {e}");
                    self.audit(
                        &ctx.run_id,
                        "dispatch_failed",
                        Some(resource.key),
                        Some(e.to_string()),
                    );
                }
            }
        }
        tally
    }

    fn drain_completions(
        &self,
        completions: &mut mpsc::UnboundedReceiver<JobCompletion>,
        in_flight: &mut InFlightSet,
        ctx: &mut RunContext,
    ) {
        while let Ok(done) = completions.try_recv() {
            self.observe_completion(done, in_flight, ctx);
        }
    }

    fn observe_completion(
        &self,
        done: JobCompletion,
        in_flight: &mut InFlightSet,
        ctx: &mut RunContext,
    ) {
        if !in_flight.complete(&done.key) {
            return;
        }
        ctx.completions += 1;
        if let JobOutcome::TransientFailure(reason) = &done.outcome {
            tracing::debug!(resource = %done.key, "job failed transiently: {reason}");
        }
        self.audit(&ctx.run_id, "complete", Some(done.key), Some(format!("{:?}", done.outcome)));
    }

    /// Block until one completion arrives, the next renewal is due, the
    /// budget runs out, or the run is cancelled.
    async fn wait_for_completion(
        &self,
        completions: &mut mpsc::UnboundedReceiver<JobCompletion>,
        in_flight: &mut InFlightSet,
        ctx: &mut RunContext,
        last_renewal: Instant,
    ) -> Option<RunOutcome> {
        let max_wait = if self.limits.lease_renew_interval.is_zero() {
            self.limits.lease_ttl / 2
        } else {
            self.limits.lease_renew_interval
        };
        let wake_at = (last_renewal + max_wait).min(ctx.deadline);

        tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(RunOutcome::Cancelled),
            received = tokio::time::timeout_at(wake_at, completions.recv()) => {
                if let Ok(Some(done)) = received {
                    self.observe_completion(done, in_flight, ctx);
                }
                None
            }
        }
    }

    fn audit(
        &self,
        run_id: &str,
        action: &str,
        resource: Option<ResourceKey>,
        detail: Option<String>,
    ) {
        if let Some(sink) = &self.audit {
            sink.lock().record(build_audit_event(
                run_id,
                self.identity.as_str(),
                action,
                resource.map(|k| k.to_string()),
                detail,
            ));
        }
    }
}
