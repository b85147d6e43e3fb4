//! Read-side access to the spatial database: metadata introspection over a
//! freshly loaded staging relation, and row/feature/tile reads for serving.

pub mod mock_store;
pub mod postgis;

pub use mock_store::MockSpatialStore;
pub use postgis::PostgisStore;

use crate::datasets::BoundingBox;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::fmt::Debug;

/// The smallest valid Mapbox Vector Tile: a layer field with zero length.
/// Returned verbatim for tiles with no intersecting geometry.
pub const EMPTY_TILE: [u8; 2] = [0x1a, 0x00];

/// A lazily produced page of rows, each serialized as a JSON object.
pub type RowStream = BoxStream<'static, Result<String, sqlx::Error>>;

#[async_trait]
pub trait SpatialStore: Debug + Send + Sync {
    /// Axis-aligned extent of the relation's geometries, `None` when the
    /// relation holds no geometries.
    async fn extent(&self, table: &str) -> Result<Option<BoundingBox>>;

    /// First column of the relation's primary-key constraint, `None` when the
    /// relation has no primary key (or does not exist).
    async fn primary_key_column(&self, table: &str) -> Result<Option<String>>;

    /// Stream one page of rows ordered by `order_by` (insertion order when it
    /// is the loader's synthetic serial key). Rows are fetched in chunks; the
    /// full page is never materialized.
    async fn row_page(
        &self,
        table: &str,
        order_by: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<RowStream>;

    /// GeoJSON Features for the relation, optionally filtered to geometries
    /// intersecting `bbox`.
    async fn features(
        &self,
        table: &str,
        bbox: Option<&BoundingBox>,
    ) -> Result<Vec<serde_json::Value>>;

    /// One MVT tile from the database-side `get_dataset_tile` function.
    /// `None` or empty bytes mean no intersecting geometry.
    async fn tile(
        &self,
        table: &str,
        primary_key_column: &str,
        z: u32,
        x: u32,
        y: u32,
    ) -> Result<Option<Vec<u8>>>;
}

/// Quote a SQL identifier for interpolation into runtime-built statements.
/// Staging relation names are derived from UUIDs and column names come from
/// catalog introspection, but everything is quoted regardless.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
