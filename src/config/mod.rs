//! Configuration models for the scheduler, lease backend, and limits.

pub mod scheduler;

pub use scheduler::{LeaseBackendConfig, SchedulerConfig, ENV_PREFIX};
