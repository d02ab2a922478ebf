//! In-process store for tests and `--ephemeral` runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::models::{Record, RecordKey, StoreWrite};
use super::store::{RegistryStore, StoreError};

/// A [`RegistryStore`] kept in a map.
///
/// [`MemoryStore::set_unavailable`] makes every subsequent operation fail,
/// which is how rollback paths are exercised.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<BTreeMap<RecordKey, Record>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store switched off".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegistryStore for MemoryStore {
    async fn persist(&self, key: &RecordKey, record: &Record) -> Result<(), StoreError> {
        self.check()?;
        self.records
            .write()
            .await
            .insert(key.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        self.check()?;
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        self.check()?;
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(RecordKey, Record)>, StoreError> {
        self.check()?;
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn write_batch(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        self.check()?;
        let mut records = self.records.write().await;
        for write in writes {
            match write {
                StoreWrite::Put(key, record) => {
                    records.insert(key.clone(), record.clone());
                }
                StoreWrite::Delete(key) => {
                    records.remove(key);
                }
            }
        }
        Ok(())
    }
}
