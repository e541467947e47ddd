//! Runtime adapters: job spawning and periodic run triggering on Tokio.

pub mod tokio_spawner;
pub mod trigger;

pub use tokio_spawner::TokioSpawner;
pub use trigger::{PeriodicTrigger, TriggerSummary};
