use anyhow::Result;
use chrono::Utc;
use geostage::catalog::{DatasetCatalog, MockCatalog};
use geostage::datasets::{staging_table_name, BoundingBox, Dataset, DatasetStatus, StorageBackend};
use geostage::loader::MockLoader;
use geostage::pipeline::{
    IngestRunner, PipelineError, PipelinePolicies, PipelineSupervisor, StepPolicy,
};
use geostage::spatial::MockSpatialStore;
use geostage::storage::{FetcherRegistry, MockFetcher};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

const FIXTURE_GEOJSON: &[u8] = br#"{"type":"FeatureCollection","features":[]}"#;

fn fixture_bbox() -> BoundingBox {
    BoundingBox {
        xmin: -73.99,
        ymin: 40.70,
        xmax: -73.95,
        ymax: 40.75,
    }
}

fn fixture_dataset(backend: StorageBackend) -> Dataset {
    let now = Utc::now();
    Dataset {
        uid: Uuid::new_v4(),
        account_id: 7,
        name: "roads".to_string(),
        description: None,
        file_name: "roads.geojson".to_string(),
        storage_backend: backend,
        storage_uri: "s3://uploads/datasets/roads.geojson".to_string(),
        status: DatasetStatus::Uploaded,
        bbox: None,
        primary_key_column: None,
        created_at: now,
        updated_at: now,
    }
}

struct Harness {
    catalog: Arc<MockCatalog>,
    spatial: Arc<MockSpatialStore>,
    loader: Arc<MockLoader>,
    fetcher: Arc<MockFetcher>,
    scratch: TempDir,
}

impl Harness {
    fn new(fetcher: MockFetcher, loader: MockLoader) -> Result<Self> {
        Ok(Self {
            catalog: Arc::new(MockCatalog::new()),
            spatial: Arc::new(MockSpatialStore::new()),
            loader: Arc::new(loader),
            fetcher: Arc::new(fetcher),
            scratch: tempfile::tempdir()?,
        })
    }

    fn runner(&self) -> IngestRunner {
        let fetchers = FetcherRegistry::new()
            .register(StorageBackend::Minio, self.fetcher.clone())
            .register(StorageBackend::S3, self.fetcher.clone());
        IngestRunner::new(
            self.catalog.clone(),
            fetchers,
            self.loader.clone(),
            self.spatial.clone(),
        )
        .with_scratch_root(self.scratch.path())
    }

    /// Seed a dataset in the catalog and the metadata a successful load
    /// would leave in the spatial store.
    fn seed(&self, dataset: &Dataset) {
        self.catalog.insert(dataset.clone());
        self.spatial.seed_loaded_relation(
            &staging_table_name(&dataset.uid),
            fixture_bbox(),
            "ogc_fid",
        );
    }

    fn scratch_entries(&self) -> usize {
        std::fs::read_dir(self.scratch.path())
            .map(|d| d.count())
            .unwrap_or(0)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn successful_run_reaches_ready_with_metadata() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Ready);
    assert_eq!(stored.bbox, Some(fixture_bbox()));
    assert_eq!(stored.primary_key_column.as_deref(), Some("ogc_fid"));

    assert_eq!(
        harness.catalog.status_log(dataset.uid),
        vec![DatasetStatus::Processing, DatasetStatus::Ready]
    );

    // Loader received the fetched scratch file and the staging relation name.
    let calls = harness.loader.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].0.ends_with("roads.geojson"));
    assert_eq!(calls[0].1, staging_table_name(&dataset.uid));

    // Run state cleared, scratch directory removed.
    assert!(harness.catalog.run_state(dataset.uid).is_none());
    assert_eq!(harness.scratch_entries(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn each_step_records_exactly_one_attempt_on_the_golden_path() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    assert_eq!(
        harness.catalog.run_history(dataset.uid),
        vec![
            ("fetch".to_string(), 1),
            ("load".to_string(), 1),
            ("finalize".to_string(), 1),
        ]
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_payload_fails_without_fetching() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    let mut payload = serde_json::to_value(&dataset)?;
    payload["file_name"] = serde_json::Value::String(String::new());

    let err = harness.runner().run(payload).await.unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Failed);
    assert_eq!(harness.fetcher.call_count(), 0);
    assert_eq!(harness.loader.call_count(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn transient_fetch_failures_are_retried() -> Result<()> {
    let harness = Harness::new(
        MockFetcher::new(FIXTURE_GEOJSON).fail_first(2),
        MockLoader::new(),
    )?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    assert_eq!(harness.fetcher.call_count(), 3);
    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Ready);

    // Failed attempts removed their scratch directories.
    assert_eq!(harness.scratch_entries(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fetch_gives_up_after_the_attempt_ceiling() -> Result<()> {
    let harness = Harness::new(
        MockFetcher::new(FIXTURE_GEOJSON).fail_first(10),
        MockLoader::new(),
    )?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    let err = harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Transient(_)));

    assert_eq!(harness.fetcher.call_count(), 3);
    assert_eq!(
        harness.catalog.status_log(dataset.uid),
        vec![DatasetStatus::Processing, DatasetStatus::Failed]
    );
    assert_eq!(harness.scratch_entries(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn unsupported_backend_fails_without_retry() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Https);
    harness.seed(&dataset);

    let err = harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Unsupported(_)));

    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Failed);
    // One attempt recorded, no retries for an unsupported backend.
    assert_eq!(
        harness.catalog.run_history(dataset.uid),
        vec![("fetch".to_string(), 1)]
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn timed_out_attempts_count_against_the_ceiling() -> Result<()> {
    let harness = Harness::new(
        MockFetcher::new(FIXTURE_GEOJSON).with_delay(Duration::from_millis(200)),
        MockLoader::new(),
    )?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    let mut policies = PipelinePolicies::default();
    policies.fetch = StepPolicy {
        timeout: Duration::from_millis(20),
        max_attempts: 2,
    };
    let runner = harness.runner().with_policies(policies);

    let err = runner
        .run(serde_json::to_value(&dataset)?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Timeout(..)));

    assert_eq!(harness.fetcher.call_count(), 2);
    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Failed);

    // Cancelled attempts cannot remove their own scratch directories; the
    // step exit sweeps them.
    assert_eq!(harness.scratch_entries(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn catalog_failure_aborts_the_run_before_fetching() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);
    harness.catalog.set_fail_set_status(true);

    let err = harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Transient(_)));

    // The processing transition never landed and the failure report could
    // not either; the dataset is untouched and nothing was fetched.
    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Uploaded);
    assert_eq!(harness.fetcher.call_count(), 0);
    assert_eq!(harness.loader.call_count(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn load_failure_still_removes_scratch() -> Result<()> {
    let harness = Harness::new(
        MockFetcher::new(FIXTURE_GEOJSON),
        MockLoader::new().fail_first(10),
    )?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    let err = harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Transient(_)));

    assert_eq!(harness.loader.call_count(), 3);
    assert_eq!(harness.scratch_entries(), 0);
    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Failed);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_primary_key_retries_finalize_then_fails() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.catalog.insert(dataset.clone());
    // Extent present but no primary key: the load ran, the relation is
    // unusable for ordered serving.
    harness
        .spatial
        .set_extent(&staging_table_name(&dataset.uid), fixture_bbox());

    let err = harness
        .runner()
        .run(serde_json::to_value(&dataset)?)
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::Data(_)));

    let finalize_attempts: Vec<u32> = harness
        .catalog
        .run_history(dataset.uid)
        .into_iter()
        .filter(|(step, _)| step == "finalize")
        .map(|(_, attempt)| attempt)
        .collect();
    assert_eq!(finalize_attempts, vec![1, 2, 3]);

    let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
    assert_eq!(stored.status, DatasetStatus::Failed);
    assert!(stored.bbox.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn rerun_for_a_terminal_dataset_is_a_noop() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let dataset = fixture_dataset(StorageBackend::Minio);
    harness.seed(&dataset);

    let payload = serde_json::to_value(&dataset)?;
    harness
        .runner()
        .run(payload.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e))?;
    assert_eq!(harness.loader.call_count(), 1);

    // A duplicate run for the same uid sees the terminal status and stops.
    harness
        .runner()
        .run(payload)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    assert_eq!(harness.loader.call_count(), 1);
    assert_eq!(harness.fetcher.call_count(), 1);
    assert_eq!(
        harness.catalog.status_log(dataset.uid),
        vec![DatasetStatus::Processing, DatasetStatus::Ready]
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn supervisor_resumes_a_stalled_run_to_completion() -> Result<()> {
    let harness = Harness::new(MockFetcher::new(FIXTURE_GEOJSON), MockLoader::new())?;
    let mut dataset = fixture_dataset(StorageBackend::Minio);
    dataset.status = DatasetStatus::Processing;
    harness.seed(&dataset);

    // A run that died mid-fetch in a previous process: run state persisted,
    // no terminal status.
    harness
        .catalog
        .record_run_step(dataset.uid, "fetch", 1)
        .await?;

    let runner = Arc::new(harness.runner());
    let supervisor = PipelineSupervisor::new(harness.catalog.clone(), runner)
        .with_stale_after_secs(0);
    supervisor.resume_stalled().await;

    // Resumption is fire-and-forget; poll for the terminal status.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    loop {
        let stored = harness.catalog.get_dataset(dataset.uid).await?.unwrap();
        if stored.status == DatasetStatus::Ready {
            break;
        }
        assert!(
            std::time::Instant::now() < deadline,
            "run never reached ready, status: {}",
            stored.status
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Restarted from the first step: the source was fetched and loaded again.
    assert_eq!(harness.fetcher.call_count(), 1);
    assert_eq!(harness.loader.call_count(), 1);
    assert!(harness.catalog.run_state(dataset.uid).is_none());

    Ok(())
}
