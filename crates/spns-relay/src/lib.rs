//! SPNS Relay Library
//!
//! Core functionality for the push notification relay:
//! - Device token and closed group registries with write-through storage
//! - Resolution of notify requests into deduplicated device lists
//! - Dispatch queue, push worker and push sinks
//! - `SQLite` and in-memory registry stores
//! - JSON management HTTP surface

pub mod dispatch;
pub mod error;
pub mod notifications;
pub mod registry;
pub mod router;
pub mod server;
pub mod storage;

pub use error::RelayError;
