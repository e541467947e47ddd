//! Assemble a [`DispatchScheduler`] from a [`SchedulerConfig`] and its collaborators.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{LeaseBackendConfig, SchedulerConfig};
use crate::core::{
    AuditSink, DispatchError, DispatchScheduler, JobDispatcher, LeaseStore, NodeDirectory,
    PolicySet, ResourceCatalog, SchedulerMetrics,
};
use crate::infra::{FileLeaseStore, InMemoryLeaseStore};

/// Scheduler type produced by [`SchedulerBuilder`].
pub type ConfiguredScheduler<C, D> = DispatchScheduler<PolicySet<C>, D, Arc<dyn LeaseStore>>;

/// Open the lease store named by the configuration.
pub fn lease_store_from_config(
    backend: &LeaseBackendConfig,
) -> Result<Arc<dyn LeaseStore>, DispatchError> {
    Ok(match backend {
        LeaseBackendConfig::InMemory => Arc::new(InMemoryLeaseStore::new()),
        LeaseBackendConfig::File { dir } => Arc::new(FileLeaseStore::new(dir)?),
    })
}

/// Builder for a configured scheduler.
///
/// ```rust,ignore
/// let scheduler = SchedulerBuilder::new(SchedulerConfig::from_env()?)
///     .catalog(catalog.clone())
///     .dispatcher(SpawnDispatcher::new(TokioSpawner::current(), executor, catalog))
///     .build()?;
/// let report = scheduler.run().await;
/// ```
pub struct SchedulerBuilder<C, D> {
    config: SchedulerConfig,
    catalog: Option<C>,
    dispatcher: Option<D>,
    lease_store: Option<Arc<dyn LeaseStore>>,
    audit: Option<Box<dyn AuditSink>>,
    metrics: Option<Arc<SchedulerMetrics>>,
    cancel: Option<CancellationToken>,
}

impl<C, D> SchedulerBuilder<C, D>
where
    C: ResourceCatalog + NodeDirectory,
    D: JobDispatcher,
{
    /// Start from a configuration.
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            catalog: None,
            dispatcher: None,
            lease_store: None,
            audit: None,
            metrics: None,
            cancel: None,
        }
    }

    /// Catalog the backlog and node state are read from.
    #[must_use]
    pub fn catalog(mut self, catalog: C) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Job dispatcher.
    #[must_use]
    pub fn dispatcher(mut self, dispatcher: D) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Use an existing lease store instead of opening the configured backend.
    #[must_use]
    pub fn lease_store(mut self, store: Arc<dyn LeaseStore>) -> Self {
        self.lease_store = Some(store);
        self
    }

    /// Record scheduler decisions to `sink`.
    #[must_use]
    pub fn audit(mut self, sink: Box<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Share a metrics registry across schedulers.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<SchedulerMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Cancel runs through `token`.
    #[must_use]
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Validate the configuration and build the scheduler.
    pub fn build(self) -> Result<ConfiguredScheduler<C, D>, DispatchError> {
        self.config.validate()?;
        let catalog = self
            .catalog
            .ok_or_else(|| DispatchError::InvalidConfig("catalog is required".into()))?;
        let dispatcher = self
            .dispatcher
            .ok_or_else(|| DispatchError::InvalidConfig("dispatcher is required".into()))?;
        let lease_store = match self.lease_store {
            Some(store) => store,
            None => lease_store_from_config(&self.config.lease_backend)?,
        };

        let policy = PolicySet::new(catalog, self.config.resource_types.iter().copied());
        let mut scheduler = DispatchScheduler::new(
            self.config.identity.clone(),
            self.config.limits(),
            policy,
            dispatcher,
            lease_store,
        );
        if let Some(sink) = self.audit {
            scheduler = scheduler.with_audit(sink);
        }
        if let Some(metrics) = self.metrics {
            scheduler = scheduler.with_metrics(metrics);
        }
        if let Some(token) = self.cancel {
            scheduler = scheduler.with_cancellation(token);
        }

        tracing::info!(
            identity = %self.config.identity,
            max_capacity = self.config.max_capacity,
            batch_size = self.config.db_retrieve_batch_size,
            "scheduler built"
        );
        Ok(scheduler)
    }
}
