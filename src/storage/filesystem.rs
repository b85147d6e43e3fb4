use super::{FetchError, SourceFetcher};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Fetcher that copies from a local directory tree. Used for development and
/// tests; `storage_uri` is resolved as a path relative to `root` (or taken
/// as-is when absolute).
#[derive(Debug, Clone)]
pub struct FilesystemFetcher {
    root: PathBuf,
}

impl FilesystemFetcher {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, storage_uri: &str) -> PathBuf {
        let trimmed = storage_uri.strip_prefix("file://").unwrap_or(storage_uri);
        let path = Path::new(trimmed);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

#[async_trait]
impl SourceFetcher for FilesystemFetcher {
    async fn fetch(&self, storage_uri: &str, dest: &Path) -> Result<(), FetchError> {
        let source = self.resolve(storage_uri);
        if !source.is_file() {
            return Err(FetchError::InvalidUri {
                uri: storage_uri.to_string(),
                reason: format!("no such file: {}", source.display()),
            });
        }
        tokio::fs::copy(&source, dest).await?;
        Ok(())
    }
}
