use crate::catalog::{DatasetCatalog, PostgresCatalog};
use crate::config::AppConfig;
use crate::datasets::{
    resolve_name_collision, sanitize_dataset_name, Dataset, DatasetStatus, StorageBackend,
};
use crate::loader::{Ogr2OgrLoader, SpatialLoader};
use crate::pipeline::{IngestRunner, PipelineSupervisor};
use crate::spatial::{PostgisStore, SpatialStore};
use crate::storage::{FetcherRegistry, FilesystemFetcher, S3Fetcher};
use anyhow::{anyhow, Result};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

/// Creation-time fields supplied by the caller. `name` defaults to a
/// sanitized form of `file_name`.
#[derive(Debug, Clone)]
pub struct NewDataset {
    pub name: Option<String>,
    pub description: Option<String>,
    pub file_name: String,
    pub storage_backend: StorageBackend,
    pub storage_uri: String,
}

/// Composition root: owns the catalog, the spatial store, and the ingestion
/// runner, and hands shared references to the HTTP layer.
#[derive(Debug)]
pub struct GeoStageEngine {
    catalog: Arc<dyn DatasetCatalog>,
    spatial: Arc<dyn SpatialStore>,
    runner: Arc<IngestRunner>,
    supervisor_interval: Duration,
    supervisor_stale_secs: i64,
}

impl GeoStageEngine {
    pub fn builder() -> GeoStageEngineBuilder {
        GeoStageEngineBuilder::default()
    }

    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let catalog = Arc::new(PostgresCatalog::new(&config.catalog.url).await?);
        catalog.initialize().await?;

        let spatial = Arc::new(
            PostgisStore::new(&config.spatial.url, &config.spatial.geometry_column).await?,
        );

        let loader = Arc::new(
            Ogr2OgrLoader::new(
                &config.loader.ogr2ogr_path,
                &config.spatial.keyword_dsn()?,
            )
            .with_target_srs(&config.spatial.target_srs)
            .with_geometry_column(&config.spatial.geometry_column),
        );

        let fetchers = match config.storage.storage_type.as_str() {
            "s3" => {
                let fetcher: Arc<S3Fetcher> = match &config.storage.endpoint {
                    Some(endpoint) => Arc::new(S3Fetcher::with_endpoint(
                        endpoint,
                        config.storage.access_key.as_deref().unwrap_or_default(),
                        config.storage.secret_key.as_deref().unwrap_or_default(),
                        config.storage.allow_http,
                    )),
                    None => {
                        let mut f = S3Fetcher::from_env();
                        if let Some(region) = &config.storage.region {
                            f = f.with_region(region);
                        }
                        Arc::new(f)
                    }
                };
                FetcherRegistry::new()
                    .register(StorageBackend::Minio, fetcher.clone())
                    .register(StorageBackend::S3, fetcher)
            }
            "filesystem" => {
                let root = config
                    .storage
                    .root
                    .as_deref()
                    .ok_or_else(|| anyhow!("filesystem storage requires 'root'"))?;
                let fetcher = Arc::new(FilesystemFetcher::new(root));
                FetcherRegistry::new()
                    .register(StorageBackend::Minio, fetcher.clone())
                    .register(StorageBackend::S3, fetcher)
            }
            other => return Err(anyhow!("invalid storage type: {}", other)),
        };

        let mut runner = IngestRunner::new(
            catalog.clone() as Arc<dyn DatasetCatalog>,
            fetchers,
            loader as Arc<dyn SpatialLoader>,
            spatial.clone() as Arc<dyn SpatialStore>,
        );
        if let Some(dir) = &config.pipeline.scratch_dir {
            runner = runner.with_scratch_root(dir);
        }

        Ok(Self {
            catalog,
            spatial,
            runner: Arc::new(runner),
            supervisor_interval: Duration::from_secs(
                config.pipeline.scan_interval_secs.unwrap_or(60),
            ),
            supervisor_stale_secs: config.pipeline.stale_after_secs.unwrap_or(45 * 60),
        })
    }

    pub fn catalog(&self) -> &Arc<dyn DatasetCatalog> {
        &self.catalog
    }

    pub fn spatial(&self) -> &Arc<dyn SpatialStore> {
        &self.spatial
    }

    /// Persist a new dataset record and hand it off to the ingestion
    /// pipeline. Collision resolution and persistence are synchronous; the
    /// pipeline itself is fire-and-forget.
    pub async fn create_dataset(&self, account_id: i64, new: NewDataset) -> Result<Dataset> {
        let base_name = match &new.name {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => sanitize_dataset_name(&new.file_name),
        };
        let existing = self
            .catalog
            .count_by_file_name(account_id, &new.file_name)
            .await?;
        let name = resolve_name_collision(&base_name, existing);

        let now = Utc::now();
        let dataset = Dataset {
            uid: Uuid::new_v4(),
            account_id,
            name,
            description: new.description,
            file_name: new.file_name,
            storage_backend: new.storage_backend,
            storage_uri: new.storage_uri,
            status: DatasetStatus::Uploaded,
            bbox: None,
            primary_key_column: None,
            created_at: now,
            updated_at: now,
        };

        self.catalog.create_dataset(&dataset).await?;
        info!(dataset_uid = %dataset.uid, name = %dataset.name, "dataset created");

        self.start_ingest(&dataset);
        Ok(dataset)
    }

    /// Spawn an ingestion run for a dataset. Failures are only observable
    /// through the dataset's status.
    pub fn start_ingest(&self, dataset: &Dataset) {
        let runner = self.runner.clone();
        let payload = match serde_json::to_value(dataset) {
            Ok(v) => v,
            Err(e) => {
                error!(dataset_uid = %dataset.uid, error = %e, "failed to serialize dataset");
                return;
            }
        };
        tokio::spawn(async move {
            let _ = runner.run(payload).await;
        });
    }

    /// Start the background loop that resumes stalled ingestion runs.
    pub fn spawn_supervisor(&self) -> JoinHandle<()> {
        PipelineSupervisor::new(self.catalog.clone(), self.runner.clone())
            .with_scan_interval(self.supervisor_interval)
            .with_stale_after_secs(self.supervisor_stale_secs)
            .spawn()
    }
}

/// Builder used by tests (and any embedding) to assemble an engine from
/// explicit parts instead of live services.
#[derive(Debug, Default)]
pub struct GeoStageEngineBuilder {
    catalog: Option<Arc<dyn DatasetCatalog>>,
    spatial: Option<Arc<dyn SpatialStore>>,
    loader: Option<Arc<dyn SpatialLoader>>,
    fetchers: Option<FetcherRegistry>,
    scratch_root: Option<std::path::PathBuf>,
}

impl GeoStageEngineBuilder {
    pub fn with_catalog(mut self, catalog: Arc<dyn DatasetCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_spatial(mut self, spatial: Arc<dyn SpatialStore>) -> Self {
        self.spatial = Some(spatial);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn SpatialLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_fetchers(mut self, fetchers: FetcherRegistry) -> Self {
        self.fetchers = Some(fetchers);
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<std::path::PathBuf>) -> Self {
        self.scratch_root = Some(root.into());
        self
    }

    pub fn build(self) -> Result<GeoStageEngine> {
        let catalog = self.catalog.ok_or_else(|| anyhow!("catalog is required"))?;
        let spatial = self.spatial.ok_or_else(|| anyhow!("spatial store is required"))?;
        let loader = self.loader.ok_or_else(|| anyhow!("loader is required"))?;
        let fetchers = self.fetchers.unwrap_or_default();

        let mut runner = IngestRunner::new(
            catalog.clone(),
            fetchers,
            loader,
            spatial.clone(),
        );
        if let Some(root) = self.scratch_root {
            runner = runner.with_scratch_root(root);
        }

        Ok(GeoStageEngine {
            catalog,
            spatial,
            runner: Arc::new(runner),
            supervisor_interval: Duration::from_secs(60),
            supervisor_stale_secs: 45 * 60,
        })
    }
}
