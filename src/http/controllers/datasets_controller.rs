use crate::catalog::StatusUpdate;
use crate::http::error::ApiError;
use crate::http::models::{
    CreateDatasetRequest, DatasetResponse, ListDatasetsParams, ListDatasetsResponse,
    UpdateDatasetRequest,
};
use crate::http::account_from_headers;
use crate::{GeoStageEngine, NewDataset};
use axum::{
    extract::{Path, Query as QueryParams, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use uuid::Uuid;

/// Default limit for listing datasets
const DEFAULT_DATASETS_LIMIT: i64 = 100;

/// Maximum limit for listing datasets
const MAX_DATASETS_LIMIT: i64 = 1000;

/// Handler for POST /v1/datasets - Create a dataset and trigger ingestion
#[tracing::instrument(
    name = "handler_create_dataset",
    skip(engine, headers, request),
    fields(geostage.dataset_uid = tracing::field::Empty)
)]
pub async fn create_dataset(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    Json(request): Json<CreateDatasetRequest>,
) -> Result<(StatusCode, Json<DatasetResponse>), ApiError> {
    let account_id = account_from_headers(&headers)?;

    if request.file_name.trim().is_empty() {
        return Err(ApiError::bad_request("file_name must not be empty"));
    }
    if request.storage_uri.trim().is_empty() {
        return Err(ApiError::bad_request("storage_uri must not be empty"));
    }

    let dataset = engine
        .create_dataset(
            account_id,
            NewDataset {
                name: request.name,
                description: request.description,
                file_name: request.file_name,
                storage_backend: request.storage_backend,
                storage_uri: request.storage_uri,
            },
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to create dataset: {}", e)))?;

    tracing::Span::current().record("geostage.dataset_uid", dataset.uid.to_string());

    Ok((StatusCode::CREATED, Json(dataset.into())))
}

/// Handler for GET /v1/datasets - List the caller's datasets
#[tracing::instrument(name = "handler_list_datasets", skip(engine, headers))]
pub async fn list_datasets(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    QueryParams(params): QueryParams<ListDatasetsParams>,
) -> Result<Json<ListDatasetsResponse>, ApiError> {
    let account_id = account_from_headers(&headers)?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_DATASETS_LIMIT)
        .clamp(1, MAX_DATASETS_LIMIT);
    let offset = params.offset.unwrap_or(0).max(0);

    let datasets = engine
        .catalog()
        .list_datasets(account_id, limit, offset)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to list datasets: {}", e)))?;

    let datasets: Vec<DatasetResponse> = datasets.into_iter().map(Into::into).collect();
    let count = datasets.len();

    Ok(Json(ListDatasetsResponse {
        datasets,
        count,
        offset,
        limit,
    }))
}

/// Handler for GET /v1/datasets/{uid} - Get one dataset
#[tracing::instrument(
    name = "handler_get_dataset",
    skip(engine, headers),
    fields(geostage.dataset_uid = %uid)
)]
pub async fn get_dataset(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    Path(uid): Path<Uuid>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let account_id = account_from_headers(&headers)?;

    let dataset = engine
        .catalog()
        .get_dataset_for_account(uid, account_id)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to get dataset: {}", e)))?
        .ok_or_else(|| ApiError::not_found(format!("dataset {} not found", uid)))?;

    Ok(Json(dataset.into()))
}

/// Handler for PUT /v1/datasets/{uid} - Status/metadata patch. Transitions
/// are monotonic; a non-monotonic request is rejected with 409.
#[tracing::instrument(
    name = "handler_update_dataset",
    skip(engine, headers, request),
    fields(geostage.dataset_uid = %uid)
)]
pub async fn update_dataset(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    Path(uid): Path<Uuid>,
    Json(request): Json<UpdateDatasetRequest>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let account_id = account_from_headers(&headers)?;

    engine
        .catalog()
        .get_dataset_for_account(uid, account_id)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to get dataset: {}", e)))?
        .ok_or_else(|| ApiError::not_found(format!("dataset {} not found", uid)))?;

    let applied = engine
        .catalog()
        .set_status(
            uid,
            StatusUpdate {
                status: request.status,
                bbox: request.bbox,
                primary_key_column: request.primary_key_column,
            },
        )
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to update dataset: {}", e)))?;

    if !applied {
        return Err(ApiError::conflict(format!(
            "illegal status transition to {}",
            request.status
        )));
    }

    let dataset = engine
        .catalog()
        .get_dataset(uid)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to get dataset: {}", e)))?
        .ok_or_else(|| ApiError::not_found(format!("dataset {} not found", uid)))?;

    Ok(Json(dataset.into()))
}
