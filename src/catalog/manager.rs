use crate::datasets::{BoundingBox, Dataset, DatasetStatus};
use anyhow::Result;
use async_trait::async_trait;
use std::fmt::Debug;
use uuid::Uuid;

/// Final-status payload for [`DatasetCatalog::set_status`]. `bbox` and
/// `primary_key_column` are only meaningful on the transition into `ready`.
#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub status: DatasetStatus,
    pub bbox: Option<BoundingBox>,
    pub primary_key_column: Option<String>,
}

impl StatusUpdate {
    pub fn status_only(status: DatasetStatus) -> Self {
        Self {
            status,
            bbox: None,
            primary_key_column: None,
        }
    }

    pub fn ready(bbox: BoundingBox, primary_key_column: String) -> Self {
        Self {
            status: DatasetStatus::Ready,
            bbox: Some(bbox),
            primary_key_column: Some(primary_key_column),
        }
    }
}

/// Async interface to the metadata store.
#[async_trait]
pub trait DatasetCatalog: Debug + Send + Sync {
    /// Apply schema setup. Idempotent.
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn create_dataset(&self, dataset: &Dataset) -> Result<()>;

    async fn get_dataset(&self, uid: Uuid) -> Result<Option<Dataset>>;

    /// Owner-scoped lookup. Returns `None` when the dataset does not exist
    /// or belongs to a different account, indistinguishably.
    async fn get_dataset_for_account(&self, uid: Uuid, account_id: i64)
        -> Result<Option<Dataset>>;

    async fn list_datasets(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Dataset>>;

    /// Number of datasets the account already owns with this source file name.
    async fn count_by_file_name(&self, account_id: i64, file_name: &str) -> Result<i64>;

    /// Apply a status transition. Returns `true` when the transition was
    /// applied (or was an identical repeat, which is a no-op), `false` when
    /// it was rejected as non-monotonic. Terminal states never change.
    async fn set_status(&self, uid: Uuid, update: StatusUpdate) -> Result<bool>;

    /// Persist step progress for a run. Upserts `{step, attempt}` keyed by uid.
    async fn record_run_step(&self, uid: Uuid, step: &str, attempt: u32) -> Result<()>;

    /// Drop the run-state row once a run reaches a terminal status.
    async fn clear_run(&self, uid: Uuid) -> Result<()>;

    /// Datasets with a non-terminal status whose run row has not been touched
    /// for `stale_secs`. These are candidates for supervisor resumption.
    async fn list_stalled_runs(&self, stale_secs: i64) -> Result<Vec<Dataset>>;
}
