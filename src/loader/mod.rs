//! Spatial loader: imports a scratch file into the staging relation.

pub mod mock;
pub mod ogr2ogr;

pub use mock::MockLoader;
pub use ogr2ogr::Ogr2OgrLoader;

use async_trait::async_trait;
use std::fmt::Debug;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to spawn conversion process: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("conversion process exited with {code:?}: {stderr}")]
    Conversion { code: Option<i32>, stderr: String },
}

/// Imports `input` into the staging relation `table`, fully replacing any
/// prior contents (retries are idempotent, no partial-row visibility).
#[async_trait]
pub trait SpatialLoader: Debug + Send + Sync {
    async fn load(&self, input: &Path, table: &str) -> Result<(), LoadError>;
}
