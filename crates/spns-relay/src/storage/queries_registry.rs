//! Registry record queries: the `SQLite` side of [`RegistryStore`].

use async_trait::async_trait;
use spns_core::db::unix_timestamp;

use super::db::RelayDatabase;
use super::models::{Record, RecordKey, RegistryRow, StoreWrite};
use super::store::{RegistryStore, StoreError};

const UPSERT_RECORD: &str = "INSERT INTO registry_records (kind, record_key, value, updated_at) \
     VALUES (?, ?, ?, ?) \
     ON CONFLICT(kind, record_key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at";

const DELETE_RECORD: &str = "DELETE FROM registry_records WHERE kind = ? AND record_key = ?";

fn encode(key: &RecordKey, record: &Record) -> Result<String, StoreError> {
    record.encode().map_err(|e| StoreError::Corrupt {
        kind: key.kind().to_string(),
        id: key.id().to_string(),
        reason: e.to_string(),
    })
}

fn decode_row(row: &RegistryRow) -> Result<(RecordKey, Record), StoreError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        kind: row.kind.clone(),
        id: row.record_key.clone(),
        reason,
    };
    let key = RecordKey::from_parts(&row.kind, &row.record_key)
        .ok_or_else(|| corrupt("unknown record kind".to_string()))?;
    let record = Record::decode(&key, &row.value).map_err(|e| corrupt(e.to_string()))?;
    Ok((key, record))
}

#[async_trait]
impl RegistryStore for RelayDatabase {
    async fn persist(&self, key: &RecordKey, record: &Record) -> Result<(), StoreError> {
        let value = encode(key, record)?;
        sqlx::query(UPSERT_RECORD)
            .bind(key.kind())
            .bind(key.id())
            .bind(value)
            .bind(unix_timestamp())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn load(&self, key: &RecordKey) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query_as::<_, RegistryRow>(
            "SELECT * FROM registry_records WHERE kind = ? AND record_key = ?",
        )
        .bind(key.kind())
        .bind(key.id())
        .fetch_optional(self.pool())
        .await?;

        row.map(|r| decode_row(&r).map(|(_, record)| record))
            .transpose()
    }

    async fn delete(&self, key: &RecordKey) -> Result<(), StoreError> {
        sqlx::query(DELETE_RECORD)
            .bind(key.kind())
            .bind(key.id())
            .execute(self.pool())
            .await?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<(RecordKey, Record)>, StoreError> {
        let rows = sqlx::query_as::<_, RegistryRow>(
            "SELECT * FROM registry_records ORDER BY kind, record_key",
        )
        .fetch_all(self.pool())
        .await?;

        rows.iter().map(decode_row).collect()
    }

    /// All writes land in one transaction.
    async fn write_batch(&self, writes: &[StoreWrite]) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let mut tx = self.pool().begin().await?;

        for write in writes {
            match write {
                StoreWrite::Put(key, record) => {
                    let value = encode(key, record)?;
                    sqlx::query(UPSERT_RECORD)
                        .bind(key.kind())
                        .bind(key.id())
                        .bind(value)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                }
                StoreWrite::Delete(key) => {
                    sqlx::query(DELETE_RECORD)
                        .bind(key.kind())
                        .bind(key.id())
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        tx.commit().await?;
        Ok(())
    }
}
