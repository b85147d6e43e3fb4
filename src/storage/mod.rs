//! Source fetchers: retrieve an uploaded object into a local scratch file.

pub mod filesystem;
pub mod mock;
pub mod s3;

pub use filesystem::FilesystemFetcher;
pub use mock::MockFetcher;
pub use s3::S3Fetcher;

use crate::datasets::StorageBackend;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid storage uri '{uri}': {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("object download failed: {0}")]
    Download(String),

    #[error("scratch write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Capability interface over one storage backend. Implementations download
/// the object at `storage_uri` into `dest` atomically from the caller's point
/// of view: on error, `dest` may be absent or partial and the caller discards
/// the scratch directory.
#[async_trait]
pub trait SourceFetcher: Debug + Send + Sync {
    async fn fetch(&self, storage_uri: &str, dest: &Path) -> Result<(), FetchError>;
}

/// Closed set of fetchers selected by the dataset's stored backend enum at the
/// composition root. Backends without a registered fetcher fail ingestion as
/// unsupported.
#[derive(Debug, Clone, Default)]
pub struct FetcherRegistry {
    fetchers: HashMap<StorageBackend, Arc<dyn SourceFetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, backend: StorageBackend, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers.insert(backend, fetcher);
        self
    }

    pub fn for_backend(&self, backend: StorageBackend) -> Option<Arc<dyn SourceFetcher>> {
        self.fetchers.get(&backend).cloned()
    }
}

/// Split an `s3://bucket/key` URI into bucket and object key.
pub(crate) fn parse_object_uri(storage_uri: &str) -> Result<(String, String), FetchError> {
    let url = url::Url::parse(storage_uri).map_err(|e| FetchError::InvalidUri {
        uri: storage_uri.to_string(),
        reason: e.to_string(),
    })?;

    if url.scheme() != "s3" {
        return Err(FetchError::InvalidUri {
            uri: storage_uri.to_string(),
            reason: format!("expected s3:// scheme, got {}://", url.scheme()),
        });
    }

    let bucket = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| FetchError::InvalidUri {
            uri: storage_uri.to_string(),
            reason: "missing bucket".to_string(),
        })?;

    let key = url.path().trim_start_matches('/');
    if key.is_empty() {
        return Err(FetchError::InvalidUri {
            uri: storage_uri.to_string(),
            reason: "missing object key".to_string(),
        });
    }

    Ok((bucket.to_string(), key.to_string()))
}
