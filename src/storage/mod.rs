//! Storage adapter for the person catalog.
//!
//! `CatalogStore` is what the resolution engine needs from a backend;
//! `InMemoryCatalog` implements it for embedded use and tests.

mod memory;
mod traits;

pub use memory::InMemoryCatalog;
pub use traits::{CatalogStore, StorageError};
