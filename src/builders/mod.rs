//! Builders to construct schedulers from configuration.

pub mod scheduler_builder;

pub use scheduler_builder::{lease_store_from_config, SchedulerBuilder};
