//! In-memory spatial store for tests.

use super::{RowStream, SpatialStore};
use crate::datasets::BoundingBox;
use anyhow::Result;
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Mutex;

/// Serves fixture rows/tiles from memory, keyed the same way the PostGIS
/// implementation keys its queries.
#[derive(Debug, Default)]
pub struct MockSpatialStore {
    extents: Mutex<HashMap<String, BoundingBox>>,
    primary_keys: Mutex<HashMap<String, String>>,
    rows: Mutex<HashMap<String, Vec<serde_json::Value>>>,
    tiles: Mutex<HashMap<(String, u32, u32, u32), Vec<u8>>>,
}

impl MockSpatialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_extent(&self, table: &str, bbox: BoundingBox) {
        self.extents.lock().unwrap().insert(table.to_string(), bbox);
    }

    pub fn set_primary_key(&self, table: &str, column: &str) {
        self.primary_keys
            .lock()
            .unwrap()
            .insert(table.to_string(), column.to_string());
    }

    pub fn set_rows(&self, table: &str, rows: Vec<serde_json::Value>) {
        self.rows.lock().unwrap().insert(table.to_string(), rows);
    }

    pub fn set_tile(&self, table: &str, z: u32, x: u32, y: u32, bytes: Vec<u8>) {
        self.tiles
            .lock()
            .unwrap()
            .insert((table.to_string(), z, x, y), bytes);
    }

    /// Seed extent and primary key together, as a successful load would
    /// leave them.
    pub fn seed_loaded_relation(&self, table: &str, bbox: BoundingBox, pk: &str) {
        self.set_extent(table, bbox);
        self.set_primary_key(table, pk);
    }
}

#[async_trait]
impl SpatialStore for MockSpatialStore {
    async fn extent(&self, table: &str) -> Result<Option<BoundingBox>> {
        Ok(self.extents.lock().unwrap().get(table).copied())
    }

    async fn primary_key_column(&self, table: &str) -> Result<Option<String>> {
        Ok(self.primary_keys.lock().unwrap().get(table).cloned())
    }

    async fn row_page(
        &self,
        table: &str,
        _order_by: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<RowStream> {
        let rows: Vec<Result<String, sqlx::Error>> = self
            .rows
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .map(|v| Ok(v.to_string()))
            .collect();

        Ok(Box::pin(stream::iter(rows)))
    }

    async fn features(
        &self,
        table: &str,
        bbox: Option<&BoundingBox>,
    ) -> Result<Vec<serde_json::Value>> {
        let rows = self
            .rows
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default();

        // The mock does not evaluate geometry intersection; a bbox filter
        // just proves the parameter threads through.
        let _ = bbox;
        Ok(rows)
    }

    async fn tile(
        &self,
        table: &str,
        _primary_key_column: &str,
        z: u32,
        x: u32,
        y: u32,
    ) -> Result<Option<Vec<u8>>> {
        Ok(self
            .tiles
            .lock()
            .unwrap()
            .get(&(table.to_string(), z, x, y))
            .cloned())
    }
}
