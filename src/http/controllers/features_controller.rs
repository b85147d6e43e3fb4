use crate::datasets::{staging_table_name, BoundingBox, Dataset, DatasetStatus};
use crate::http::account_from_headers;
use crate::http::error::ApiError;
use crate::http::models::{FeatureParams, TablePageParams, TileParams};
use crate::GeoStageEngine;
use axum::{
    body::Body,
    extract::{Path, Query as QueryParams, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures::{future, stream, StreamExt};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

const DEFAULT_PAGE_LIMIT: i64 = 10;
const MAX_PAGE_LIMIT: i64 = 10_000;

const MVT_CONTENT_TYPE: &str = "application/x-protobuf";

/// Look up a dataset for serving: owner-scoped (missing and foreign datasets
/// are both 404, so existence does not leak) and only readable once `ready`.
async fn serving_dataset(
    engine: &GeoStageEngine,
    headers: &HeaderMap,
    uid: Uuid,
) -> Result<Dataset, ApiError> {
    let account_id = account_from_headers(headers)?;

    let dataset = engine
        .catalog()
        .get_dataset_for_account(uid, account_id)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to get dataset: {}", e)))?
        .ok_or_else(|| ApiError::not_found(format!("dataset {} not found", uid)))?;

    if dataset.status != DatasetStatus::Ready {
        return Err(ApiError::conflict(format!(
            "dataset {} is not ready (status: {})",
            uid, dataset.status
        )));
    }

    Ok(dataset)
}

/// Handler for GET /v1/datasets/{uid}/table - Stream one page of rows as a
/// JSON array, without materializing the page in memory.
#[tracing::instrument(
    name = "handler_read_table",
    skip(engine, headers),
    fields(geostage.dataset_uid = %uid)
)]
pub async fn read_table(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    Path(uid): Path<Uuid>,
    QueryParams(params): QueryParams<TablePageParams>,
) -> Result<Response, ApiError> {
    let dataset = serving_dataset(&engine, &headers, uid).await?;

    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if !(1..=MAX_PAGE_LIMIT).contains(&limit) {
        return Err(ApiError::bad_request(format!(
            "limit must be between 1 and {}",
            MAX_PAGE_LIMIT
        )));
    }
    let offset = params.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::bad_request("offset must not be negative"));
    }

    let table = staging_table_name(&dataset.uid);
    let rows = engine
        .spatial()
        .row_page(&table, dataset.primary_key_column.as_deref(), limit, offset)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to read rows: {}", e)))?;

    let body = rows.enumerate().map(|(i, row)| {
        row.map(|json| {
            if i == 0 {
                Bytes::from(json)
            } else {
                Bytes::from(format!(",{}", json))
            }
        })
    });
    let body = stream::once(future::ready(Ok(Bytes::from_static(b"["))))
        .chain(body)
        .chain(stream::once(future::ready(Ok(Bytes::from_static(b"]")))));

    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        Body::from_stream(body),
    )
        .into_response())
}

/// Handler for GET /v1/datasets/{uid}/features - GeoJSON FeatureCollection,
/// optionally filtered by a bounding box.
#[tracing::instrument(
    name = "handler_read_features",
    skip(engine, headers),
    fields(geostage.dataset_uid = %uid)
)]
pub async fn read_features(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    Path(uid): Path<Uuid>,
    QueryParams(params): QueryParams<FeatureParams>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let dataset = serving_dataset(&engine, &headers, uid).await?;

    let bbox = params.bbox.as_deref().map(parse_bbox).transpose()?;

    let table = staging_table_name(&dataset.uid);
    let features = engine
        .spatial()
        .features(&table, bbox.as_ref())
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to read features: {}", e)))?;

    Ok(Json(json!({
        "type": "FeatureCollection",
        "features": features,
    })))
}

/// Handler for GET /v1/datasets/{uid}/tiles/{z}/{x}/{y}.pbf - One MVT tile.
/// A tile with no intersecting geometry returns the 2-byte empty-tile
/// sentinel, not an error.
#[tracing::instrument(
    name = "handler_read_tile",
    skip(engine, headers),
    fields(geostage.dataset_uid = %uid, geostage.tile = tracing::field::Empty)
)]
pub async fn read_tile(
    State(engine): State<Arc<GeoStageEngine>>,
    headers: HeaderMap,
    Path((uid, z, x, y)): Path<(Uuid, u32, u32, String)>,
    QueryParams(params): QueryParams<TileParams>,
) -> Result<Response, ApiError> {
    let dataset = serving_dataset(&engine, &headers, uid).await?;

    let y: u32 = y
        .strip_suffix(".pbf")
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| ApiError::bad_request("tile path must end in <y>.pbf"))?;

    if z > 30 || u64::from(x) >= (1u64 << z) || u64::from(y) >= (1u64 << z) {
        return Err(ApiError::bad_request(format!(
            "tile {}/{}/{} is out of range",
            z, x, y
        )));
    }
    tracing::Span::current().record("geostage.tile", format!("{}/{}/{}", z, x, y));

    let primary_key = params
        .primary_key
        .or_else(|| dataset.primary_key_column.clone())
        .ok_or_else(|| ApiError::conflict("dataset has no primary key column"))?;

    let table = staging_table_name(&dataset.uid);
    let tile = engine
        .spatial()
        .tile(&table, &primary_key, z, x, y)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to generate tile: {}", e)))?;

    let bytes = match tile {
        Some(bytes) if !bytes.is_empty() => bytes,
        _ => crate::spatial::EMPTY_TILE.to_vec(),
    };

    Ok(([(header::CONTENT_TYPE, MVT_CONTENT_TYPE)], bytes).into_response())
}

fn parse_bbox(raw: &str) -> Result<BoundingBox, ApiError> {
    let parts: Vec<f64> = raw
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<Result<_, _>>()
        .map_err(|_| ApiError::bad_request("bbox must be four numbers: xmin,ymin,xmax,ymax"))?;

    if parts.len() != 4 {
        return Err(ApiError::bad_request(
            "bbox must be four numbers: xmin,ymin,xmax,ymax",
        ));
    }
    let (xmin, ymin, xmax, ymax) = (parts[0], parts[1], parts[2], parts[3]);
    if xmin > xmax || ymin > ymax {
        return Err(ApiError::bad_request("bbox min must not exceed max"));
    }

    Ok(BoundingBox {
        xmin,
        ymin,
        xmax,
        ymax,
    })
}
