//! Catalog backends: resources, nodes, namespaces, and registry records.

pub mod memory;

pub use memory::InMemoryCatalog;
