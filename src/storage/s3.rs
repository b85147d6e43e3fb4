use super::{parse_object_uri, FetchError, SourceFetcher};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use object_store::{path::Path as ObjectPath, ObjectStore};
use std::path::Path;

/// Fetcher for S3-compatible object stores. With an explicit endpoint this
/// covers MinIO (path-style requests); without one it targets AWS S3 using
/// ambient credentials.
#[derive(Debug, Clone)]
pub struct S3Fetcher {
    endpoint: Option<String>,
    access_key: Option<String>,
    secret_key: Option<String>,
    region: Option<String>,
    allow_http: bool,
}

impl S3Fetcher {
    pub fn from_env() -> Self {
        Self {
            endpoint: None,
            access_key: None,
            secret_key: None,
            region: None,
            allow_http: false,
        }
    }

    /// Fetcher for MinIO/S3-compatible storage with a custom endpoint.
    pub fn with_endpoint(
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
        allow_http: bool,
    ) -> Self {
        Self {
            endpoint: Some(endpoint.to_string()),
            access_key: Some(access_key.to_string()),
            secret_key: Some(secret_key.to_string()),
            region: None,
            allow_http,
        }
    }

    pub fn with_region(mut self, region: &str) -> Self {
        self.region = Some(region.to_string());
        self
    }

    fn store_for_bucket(&self, bucket: &str) -> Result<impl ObjectStore, FetchError> {
        let mut builder = if self.endpoint.is_some() {
            AmazonS3Builder::new()
        } else {
            AmazonS3Builder::from_env()
        };
        builder = builder.with_bucket_name(bucket);

        if let Some(endpoint) = &self.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(self.allow_http)
                // MinIO needs path-style URLs
                .with_virtual_hosted_style_request(false);
        }
        if let Some(access_key) = &self.access_key {
            builder = builder.with_access_key_id(access_key);
        }
        if let Some(secret_key) = &self.secret_key {
            builder = builder.with_secret_access_key(secret_key);
        }
        if let Some(region) = &self.region {
            builder = builder.with_region(region);
        }

        builder
            .build()
            .map_err(|e| FetchError::Download(e.to_string()))
    }
}

#[async_trait]
impl SourceFetcher for S3Fetcher {
    async fn fetch(&self, storage_uri: &str, dest: &Path) -> Result<(), FetchError> {
        let (bucket, key) = parse_object_uri(storage_uri)?;
        let store = self.store_for_bucket(&bucket)?;

        let result = store
            .get(&ObjectPath::from(key))
            .await
            .map_err(|e| FetchError::Download(e.to_string()))?;
        let bytes = result
            .bytes()
            .await
            .map_err(|e| FetchError::Download(e.to_string()))?;

        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}
