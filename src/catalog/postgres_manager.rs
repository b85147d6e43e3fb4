use crate::catalog::manager::{DatasetCatalog, StatusUpdate};
use crate::datasets::{BoundingBox, Dataset, DatasetStatus, StorageBackend};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::fmt::{self, Debug, Formatter};
use uuid::Uuid;

pub struct PostgresCatalog {
    pool: PgPool,
}

impl Debug for PostgresCatalog {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresCatalog").finish()
    }
}

impl PostgresCatalog {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_dataset(row: &PgRow) -> Result<Dataset> {
        let status: String = row.try_get("status")?;
        let backend: String = row.try_get("storage_backend")?;
        let bbox: Option<BoundingBox> = row
            .try_get::<Option<String>, _>("bbox")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        Ok(Dataset {
            uid: row.try_get("uid")?,
            account_id: row.try_get("account_id")?,
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            file_name: row.try_get("file_name")?,
            storage_backend: StorageBackend::parse(&backend)
                .ok_or_else(|| anyhow!("unknown storage backend in catalog: {}", backend))?,
            storage_uri: row.try_get("storage_uri")?,
            status: DatasetStatus::parse(&status)
                .ok_or_else(|| anyhow!("unknown dataset status in catalog: {}", status))?,
            bbox,
            primary_key_column: row.try_get("primary_key_column")?,
            created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
        })
    }
}

const DATASET_COLUMNS: &str = "uid, account_id, name, description, file_name, \
     storage_backend, storage_uri, status, bbox::text AS bbox, primary_key_column, \
     created_at, updated_at";

#[async_trait]
impl DatasetCatalog for PostgresCatalog {
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS datasets (
                id BIGSERIAL PRIMARY KEY,
                uid UUID UNIQUE NOT NULL,
                account_id BIGINT NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                file_name TEXT NOT NULL,
                storage_backend TEXT NOT NULL,
                storage_uri TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'uploaded',
                bbox JSONB,
                primary_key_column TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_datasets_account_file
                 ON datasets (account_id, file_name)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS ingest_runs (
                uid UUID PRIMARY KEY REFERENCES datasets(uid) ON DELETE CASCADE,
                step TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn create_dataset(&self, dataset: &Dataset) -> Result<()> {
        let bbox_json = dataset
            .bbox
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            "INSERT INTO datasets (uid, account_id, name, description, file_name,
                 storage_backend, storage_uri, status, bbox, primary_key_column,
                 created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9::jsonb, $10, $11, $12)",
        )
        .bind(dataset.uid)
        .bind(dataset.account_id)
        .bind(&dataset.name)
        .bind(&dataset.description)
        .bind(&dataset.file_name)
        .bind(dataset.storage_backend.as_str())
        .bind(&dataset.storage_uri)
        .bind(dataset.status.as_str())
        .bind(bbox_json)
        .bind(&dataset.primary_key_column)
        .bind(dataset.created_at)
        .bind(dataset.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_dataset(&self, uid: Uuid) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM datasets WHERE uid = $1",
            DATASET_COLUMNS
        ))
        .bind(uid)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_dataset).transpose()
    }

    async fn get_dataset_for_account(
        &self,
        uid: Uuid,
        account_id: i64,
    ) -> Result<Option<Dataset>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM datasets WHERE uid = $1 AND account_id = $2",
            DATASET_COLUMNS
        ))
        .bind(uid)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_dataset).transpose()
    }

    async fn list_datasets(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM datasets WHERE account_id = $1
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            DATASET_COLUMNS
        ))
        .bind(account_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_dataset).collect()
    }

    async fn count_by_file_name(&self, account_id: i64, file_name: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM datasets WHERE account_id = $1 AND file_name = $2",
        )
        .bind(account_id)
        .bind(file_name)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn set_status(&self, uid: Uuid, update: StatusUpdate) -> Result<bool> {
        let bbox_json = update.bbox.as_ref().map(serde_json::to_string).transpose()?;

        // The WHERE clause encodes the legal transition pairs, so a stale or
        // out-of-order write touches zero rows instead of regressing state.
        // bbox and primary_key_column only travel with the ready transition.
        let result = sqlx::query(
            "UPDATE datasets
             SET status = $2,
                 bbox = CASE WHEN $2 = 'ready'
                             THEN COALESCE($3::jsonb, bbox) ELSE bbox END,
                 primary_key_column = CASE WHEN $2 = 'ready'
                             THEN COALESCE($4, primary_key_column)
                             ELSE primary_key_column END,
                 updated_at = now()
             WHERE uid = $1
               AND ((status = 'uploaded' AND $2 IN ('processing', 'failed'))
                 OR (status = 'processing' AND $2 IN ('ready', 'failed')))",
        )
        .bind(uid)
        .bind(update.status.as_str())
        .bind(bbox_json)
        .bind(&update.primary_key_column)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(true);
        }

        // Repeating an already-applied transition is a no-op, not a rejection.
        let current: Option<String> = sqlx::query_scalar("SELECT status FROM datasets WHERE uid = $1")
            .bind(uid)
            .fetch_optional(&self.pool)
            .await?;

        Ok(current.as_deref() == Some(update.status.as_str()))
    }

    async fn record_run_step(&self, uid: Uuid, step: &str, attempt: u32) -> Result<()> {
        sqlx::query(
            "INSERT INTO ingest_runs (uid, step, attempt, updated_at)
             VALUES ($1, $2, $3, now())
             ON CONFLICT (uid) DO UPDATE
             SET step = EXCLUDED.step, attempt = EXCLUDED.attempt, updated_at = now()",
        )
        .bind(uid)
        .bind(step)
        .bind(attempt as i32)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn clear_run(&self, uid: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM ingest_runs WHERE uid = $1")
            .bind(uid)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_stalled_runs(&self, stale_secs: i64) -> Result<Vec<Dataset>> {
        let rows = sqlx::query(
            "SELECT d.uid, d.account_id, d.name, d.description, d.file_name,
                    d.storage_backend, d.storage_uri, d.status, d.bbox::text AS bbox,
                    d.primary_key_column, d.created_at, d.updated_at
             FROM datasets d
             JOIN ingest_runs r ON r.uid = d.uid
             WHERE d.status IN ('uploaded', 'processing')
               AND r.updated_at < now() - make_interval(secs => $1)",
        )
        .bind(stale_secs as f64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_dataset).collect()
    }
}
