use crate::datasets::{BoundingBox, Dataset, DatasetStatus, StorageBackend};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request body for POST /v1/datasets
#[derive(Debug, Deserialize)]
pub struct CreateDatasetRequest {
    /// Display name; derived from `file_name` when omitted.
    pub name: Option<String>,
    pub description: Option<String>,
    pub file_name: String,
    pub storage_backend: StorageBackend,
    pub storage_uri: String,
}

/// Full dataset representation returned by every dataset endpoint.
#[derive(Debug, Serialize)]
pub struct DatasetResponse {
    pub uid: Uuid,
    pub account_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub file_name: String,
    pub storage_backend: StorageBackend,
    pub storage_uri: String,
    pub status: DatasetStatus,
    pub bbox: Option<BoundingBox>,
    pub primary_key_column: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Dataset> for DatasetResponse {
    fn from(d: Dataset) -> Self {
        Self {
            uid: d.uid,
            account_id: d.account_id,
            name: d.name,
            description: d.description,
            file_name: d.file_name,
            storage_backend: d.storage_backend,
            storage_uri: d.storage_uri,
            status: d.status,
            bbox: d.bbox,
            primary_key_column: d.primary_key_column,
            created_at: d.created_at,
            updated_at: d.updated_at,
        }
    }
}

/// Response body for GET /v1/datasets
#[derive(Debug, Serialize)]
pub struct ListDatasetsResponse {
    pub datasets: Vec<DatasetResponse>,
    pub count: usize,
    pub offset: i64,
    pub limit: i64,
}

/// Query parameters for GET /v1/datasets
#[derive(Debug, Deserialize)]
pub struct ListDatasetsParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Request body for PUT /v1/datasets/{uid} — the `set_status` contract used
/// by the finalizer. Monotonic; terminal states never change.
#[derive(Debug, Deserialize)]
pub struct UpdateDatasetRequest {
    pub status: DatasetStatus,
    pub bbox: Option<BoundingBox>,
    pub primary_key_column: Option<String>,
}

/// Query parameters for GET /v1/datasets/{uid}/table
#[derive(Debug, Deserialize)]
pub struct TablePageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Query parameters for GET /v1/datasets/{uid}/features
#[derive(Debug, Deserialize)]
pub struct FeatureParams {
    /// "xmin,ymin,xmax,ymax"
    pub bbox: Option<String>,
}

/// Query parameters for GET /v1/datasets/{uid}/tiles/{z}/{x}/{y}.pbf
#[derive(Debug, Deserialize)]
pub struct TileParams {
    /// Overrides the dataset's stored primary-key column.
    pub primary_key: Option<String>,
}
