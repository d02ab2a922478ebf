//! Durable storage for the SPNS relay registries.
//!
//! The registries only see the [`RegistryStore`] trait. [`RelayDatabase`]
//! is the `SQLite` backend; [`MemoryStore`] backs tests and ephemeral runs.

mod db;
mod memory;
mod models;
mod queries_registry;
mod store;


pub use db::RelayDatabase;
pub use memory::MemoryStore;
pub use models::*;
pub use spns_core::db::DatabaseError;
pub use store::{RegistryStore, StoreError};
