//! # Replica Dispatch
//!
//! A bounded-capacity, time-boxed dispatch scheduler for replication
//! secondaries.
//!
//! A secondary node periodically discovers resources (blobs, attachments)
//! that it has not yet replicated from the primary, and hands each one to a
//! job pool as a transfer job. The scheduler keeps at most `max_capacity`
//! jobs in flight, never dispatches a resource twice within a run, stops
//! admitting work when its time budget runs out, and holds an exclusive
//! lease so only one run per identity is active across the fleet.
//!
//! ## Key Features
//!
//! - **Exclusive run lease**: TTL lease with holder tokens; contention skips
//!   the run, a refused renewal stops it
//! - **Bounded in-flight set**: run-local, deduplicating, capacity-checked
//! - **Refill policy**: local pending buffer, undersized reloads switch the
//!   run to draining, draining re-queries at a free-capacity watermark
//! - **Policy layer**: node role gate, resource-type enablement, nested
//!   namespace restriction, round-robin type interleave
//! - **Completion flow**: jobs write the registry, then signal the run
//!   through a [`CompletionNotifier`](core::CompletionNotifier)
//! - **Backends**: in-memory and file-backed lease stores, in-memory catalog
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use replica_dispatch::builders::SchedulerBuilder;
//! use replica_dispatch::config::SchedulerConfig;
//! use replica_dispatch::core::SpawnDispatcher;
//! use replica_dispatch::infra::InMemoryCatalog;
//! use replica_dispatch::runtime::{PeriodicTrigger, TokioSpawner};
//!
//! let catalog = Arc::new(InMemoryCatalog::new());
//! let scheduler = SchedulerBuilder::new(SchedulerConfig::from_env()?)
//!     .catalog(Arc::clone(&catalog))
//!     .dispatcher(SpawnDispatcher::new(TokioSpawner::current(), my_executor, catalog))
//!     .build()?;
//!
//! let summary = PeriodicTrigger::new(Duration::from_secs(60)).run(&scheduler).await;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions, lease, policy, and the dispatch loop.
pub mod core;
/// Configuration models for the scheduler and its backends.
pub mod config;
/// Builders to construct schedulers from configuration.
pub mod builders;
/// Infrastructure adapters for lease and catalog storage.
pub mod infra;
/// Runtime adapters: Tokio spawner and periodic trigger.
pub mod runtime;
/// Shared utilities.
pub mod util;
