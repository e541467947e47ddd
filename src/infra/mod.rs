//! Infrastructure adapters for lease and catalog storage backends.

pub mod catalog;
pub mod lease;

pub use catalog::InMemoryCatalog;
pub use lease::{FileLeaseStore, InMemoryLeaseStore};
