//! Durable backing store consumed by the registries.

use async_trait::async_trait;

use spns_core::db::DatabaseError;

use super::models::{Record, RecordKey, StoreWrite};

/// Backing store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached or rejected the write.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be decoded.
    #[error("corrupt record {kind}/{id}: {reason}")]
    Corrupt {
        kind: String,
        id: String,
        reason: String,
    },
}

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        Self::Unavailable(e.to_string())
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::Unavailable(e.to_string())
    }
}

/// Key/record persistence for the device and closed-group registries.
///
/// Registries write through this trait while holding their own lock and roll
/// their in-memory state back when a write fails, so the store and the
/// registry never diverge.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Insert or replace one record.
    async fn persist(&self, key: &RecordKey, record: &Record) -> Result<(), StoreError>;

    /// Fetch one record; `None` when absent.
    async fn load(&self, key: &RecordKey) -> Result<Option<Record>, StoreError>;

    /// Remove one record. Removing an absent record succeeds.
    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError>;

    /// Every stored record. Used to warm the registries at startup.
    async fn load_all(&self) -> Result<Vec<(RecordKey, Record)>, StoreError>;

    /// Apply several writes. Backends that can should make the batch atomic;
    /// the default applies them in order and stops at the first failure.
    async fn write_batch(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        for write in writes {
            match write {
                StoreWrite::Put(key, record) => self.persist(key, record).await?,
                StoreWrite::Delete(key) => self.delete(key).await?,
            }
        }
        Ok(())
    }
}
