use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use uuid::Uuid;

use super::models::{UploadRecord, UploadStatus};
use crate::error::{AppError, AppResult};
use crate::ledger::models::Wei;

/// Upload metadata persistence
#[async_trait]
pub trait UploadStore: Send + Sync {
    async fn insert(&self, record: &UploadRecord) -> AppResult<()>;

    /// Pending → Settled, recording where the backend put the data
    async fn mark_settled(
        &self,
        id: Uuid,
        content_address: &str,
        provider_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> AppResult<UploadRecord>;

    /// Pending → Refunded
    async fn mark_refunded(&self, id: Uuid) -> AppResult<UploadRecord>;

    async fn get(&self, id: Uuid) -> AppResult<Option<UploadRecord>>;

    /// Newest first
    async fn list_by_owner(&self, owner: &str, limit: Option<usize>)
        -> AppResult<Vec<UploadRecord>>;
}

// ========== IN-MEMORY ==========

#[derive(Default)]
pub struct MemoryUploadStore {
    records: Mutex<HashMap<Uuid, UploadRecord>>,
}

impl MemoryUploadStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn transition(
        &self,
        id: Uuid,
        to: UploadStatus,
        apply: impl FnOnce(&mut UploadRecord),
    ) -> AppResult<UploadRecord> {
        let mut records = self.records.lock();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("upload {}", id)))?;
        UploadStatus::validate_transition(record.status, to)?;
        record.status = to;
        apply(record);
        Ok(record.clone())
    }
}

#[async_trait]
impl UploadStore for MemoryUploadStore {
    async fn insert(&self, record: &UploadRecord) -> AppResult<()> {
        let mut records = self.records.lock();
        if records.contains_key(&record.id) {
            return Err(AppError::InvalidState(format!(
                "upload {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn mark_settled(
        &self,
        id: Uuid,
        content_address: &str,
        provider_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> AppResult<UploadRecord> {
        self.transition(id, UploadStatus::Settled, |record| {
            record.content_address = Some(content_address.to_string());
            record.provider_id = Some(provider_id.to_string());
            record.uploaded_at = Some(uploaded_at);
        })
    }

    async fn mark_refunded(&self, id: Uuid) -> AppResult<UploadRecord> {
        self.transition(id, UploadStatus::Refunded, |_| {})
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<UploadRecord>> {
        Ok(self.records.lock().get(&id).cloned())
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<UploadRecord>> {
        let mut owned: Vec<UploadRecord> = self
            .records
            .lock()
            .values()
            .filter(|r| r.owner_address == owner)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = limit {
            owned.truncate(limit);
        }
        Ok(owned)
    }
}

// ========== POSTGRES ==========

pub struct PgUploadStore {
    pool: PgPool,
}

const UPLOAD_COLUMNS: &str = "id, owner_address, file_name, size_bytes, content_hash, \
     content_address, provider_id, duration_days, cost_wei::TEXT AS cost_wei, status, \
     created_at, uploaded_at";

impl PgUploadStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn record_from_row(row: &PgRow) -> AppResult<UploadRecord> {
        let size: i64 = row.try_get("size_bytes")?;
        let days: i32 = row.try_get("duration_days")?;
        let cost: String = row.try_get("cost_wei")?;

        Ok(UploadRecord {
            id: row.try_get("id")?,
            owner_address: row.try_get("owner_address")?,
            file_name: row.try_get("file_name")?,
            size_bytes: u64::try_from(size)
                .map_err(|_| AppError::Internal(format!("negative size_bytes {}", size)))?,
            content_hash: row.try_get("content_hash")?,
            content_address: row.try_get("content_address")?,
            provider_id: row.try_get("provider_id")?,
            duration_days: u32::try_from(days)
                .map_err(|_| AppError::Internal(format!("negative duration_days {}", days)))?,
            cost_wei: Wei::parse_decimal(&cost)?,
            status: row.try_get::<UploadStatus, _>("status")?,
            created_at: row.try_get("created_at")?,
            uploaded_at: row.try_get("uploaded_at")?,
        })
    }

    /// Conditional update so two racing transitions cannot both win
    async fn transition(
        &self,
        id: Uuid,
        to: UploadStatus,
        content_address: Option<&str>,
        provider_id: Option<&str>,
        uploaded_at: Option<DateTime<Utc>>,
    ) -> AppResult<UploadRecord> {
        UploadStatus::validate_transition(UploadStatus::Pending, to)?;

        let row = sqlx::query(&format!(
            r#"
            UPDATE upload_records
            SET status = $2,
                content_address = COALESCE($3, content_address),
                provider_id = COALESCE($4, provider_id),
                uploaded_at = COALESCE($5, uploaded_at)
            WHERE id = $1 AND status = 'pending'
            RETURNING {}
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .bind(to)
        .bind(content_address)
        .bind(provider_id)
        .bind(uploaded_at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Self::record_from_row(&row),
            None => match self.get(id).await? {
                Some(current) => {
                    UploadStatus::validate_transition(current.status, to)?;
                    Err(AppError::InvalidState(format!(
                        "upload {} changed concurrently",
                        id
                    )))
                }
                None => Err(AppError::NotFound(format!("upload {}", id))),
            },
        }
    }
}

#[async_trait]
impl UploadStore for PgUploadStore {
    async fn insert(&self, record: &UploadRecord) -> AppResult<()> {
        let size = i64::try_from(record.size_bytes)
            .map_err(|_| AppError::InvalidInput("file too large".to_string()))?;
        let days = i32::try_from(record.duration_days)
            .map_err(|_| AppError::InvalidInput("duration too long".to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO upload_records (
                id, owner_address, file_name, size_bytes, content_hash, content_address,
                provider_id, duration_days, cost_wei, status, created_at, uploaded_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, CAST($9 AS NUMERIC), $10, $11, $12)
            "#,
        )
        .bind(record.id)
        .bind(&record.owner_address)
        .bind(&record.file_name)
        .bind(size)
        .bind(&record.content_hash)
        .bind(&record.content_address)
        .bind(&record.provider_id)
        .bind(days)
        .bind(record.cost_wei.to_string())
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.uploaded_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn mark_settled(
        &self,
        id: Uuid,
        content_address: &str,
        provider_id: &str,
        uploaded_at: DateTime<Utc>,
    ) -> AppResult<UploadRecord> {
        self.transition(
            id,
            UploadStatus::Settled,
            Some(content_address),
            Some(provider_id),
            Some(uploaded_at),
        )
        .await
    }

    async fn mark_refunded(&self, id: Uuid) -> AppResult<UploadRecord> {
        self.transition(id, UploadStatus::Refunded, None, None, None)
            .await
    }

    async fn get(&self, id: Uuid) -> AppResult<Option<UploadRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM upload_records WHERE id = $1",
            UPLOAD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::record_from_row).transpose()
    }

    async fn list_by_owner(
        &self,
        owner: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<UploadRecord>> {
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM upload_records
            WHERE owner_address = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
            UPLOAD_COLUMNS
        ))
        .bind(owner)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::record_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending(owner: &str, offset_secs: i64) -> UploadRecord {
        UploadRecord {
            id: Uuid::new_v4(),
            owner_address: owner.to_string(),
            file_name: "a.bin".to_string(),
            size_bytes: 10,
            content_hash: "00".to_string(),
            content_address: None,
            provider_id: None,
            duration_days: 30,
            cost_wei: Wei::from(100u64),
            status: UploadStatus::Pending,
            created_at: Utc::now() + chrono::Duration::seconds(offset_secs),
            uploaded_at: None,
        }
    }

    #[tokio::test]
    async fn test_settle_then_refund_is_rejected() {
        let store = MemoryUploadStore::new();
        let record = pending("0xa", 0);
        store.insert(&record).await.unwrap();

        let settled = store
            .mark_settled(record.id, "bafy1", "provider-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(settled.status, UploadStatus::Settled);
        assert_eq!(settled.content_address.as_deref(), Some("bafy1"));

        let err = store.mark_refunded(record.id).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_unknown_upload_not_found() {
        let store = MemoryUploadStore::new();
        let err = store.mark_refunded(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(store.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_by_owner_newest_first() {
        let store = MemoryUploadStore::new();
        let older = pending("0xa", -10);
        let newer = pending("0xa", 0);
        store.insert(&older).await.unwrap();
        store.insert(&newer).await.unwrap();
        store.insert(&pending("0xb", 0)).await.unwrap();

        let listed = store.list_by_owner("0xa", None).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, newer.id);
        assert_eq!(store.list_by_owner("0xa", Some(1)).await.unwrap().len(), 1);
    }
}
