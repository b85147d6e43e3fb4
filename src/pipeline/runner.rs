use super::{IngestStep, PipelineError, PipelinePolicies, RunContext, StepPolicy};
use crate::catalog::{DatasetCatalog, StatusUpdate};
use crate::datasets::{self, Dataset, DatasetStatus};
use crate::loader::SpatialLoader;
use crate::spatial::SpatialStore;
use crate::storage::FetcherRegistry;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Executes one ingestion run: Validate -> Fetch -> Load -> Finalize.
///
/// Each step runs under its own timeout and retry ceiling. A failed run
/// reports `failed` to the catalog exactly once; failures never propagate to
/// the caller that created the dataset.
#[derive(Debug)]
pub struct IngestRunner {
    catalog: Arc<dyn DatasetCatalog>,
    fetchers: FetcherRegistry,
    loader: Arc<dyn SpatialLoader>,
    spatial: Arc<dyn SpatialStore>,
    policies: PipelinePolicies,
    scratch_root: PathBuf,
}

impl IngestRunner {
    pub fn new(
        catalog: Arc<dyn DatasetCatalog>,
        fetchers: FetcherRegistry,
        loader: Arc<dyn SpatialLoader>,
        spatial: Arc<dyn SpatialStore>,
    ) -> Self {
        Self {
            catalog,
            fetchers,
            loader,
            spatial,
            policies: PipelinePolicies::default(),
            scratch_root: std::env::temp_dir(),
        }
    }

    pub fn with_policies(mut self, policies: PipelinePolicies) -> Self {
        self.policies = policies;
        self
    }

    pub fn with_scratch_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.scratch_root = root.into();
        self
    }

    /// Drive a serialized dataset payload through the full pipeline. The
    /// returned error is informational; terminal status has already been
    /// reported to the catalog by the time this returns.
    pub async fn run(&self, payload: serde_json::Value) -> Result<(), PipelineError> {
        // Best-effort uid for failure reporting before validation succeeds.
        let uid_hint = payload
            .get("uid")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        match self.run_inner(&payload).await {
            Ok(uid) => {
                info!(dataset_uid = %uid, "ingestion completed");
                Ok(())
            }
            Err(e) => {
                error!(dataset_uid = ?uid_hint, error = %e, "ingestion failed");
                if let Some(uid) = uid_hint {
                    self.report_failed(uid).await;
                }
                Err(e)
            }
        }
    }

    async fn run_inner(&self, payload: &serde_json::Value) -> Result<Uuid, PipelineError> {
        let policies = self.policies;

        // Step 1: Validate. One attempt; malformed input stays malformed.
        // Run state exists to resume work that survives validation, so this
        // step is not recorded.
        let dataset = self
            .run_step(None, IngestStep::Validate, &policies.validate, || {
                std::future::ready(datasets::validate_payload(payload))
            })
            .await?;
        let uid = dataset.uid;

        if !self
            .set_status(uid, StatusUpdate::status_only(DatasetStatus::Processing))
            .await?
        {
            // Already terminal (e.g. a duplicate run for the same uid): the
            // original run owns the outcome, nothing left to do here.
            warn!(dataset_uid = %uid, "dataset already terminal, skipping run");
            return Ok(uid);
        }

        // Step 2: Fetch the source object into scratch storage. A timed-out
        // attempt is cancelled mid-download and cannot clean up after itself,
        // so the step exit sweeps this dataset's scratch directories.
        let ctx = match self
            .run_step(Some(uid), IngestStep::Fetch, &policies.fetch, || {
                self.fetch_to_scratch(&dataset)
            })
            .await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                self.sweep_scratch(uid).await;
                return Err(e);
            }
        };

        // Step 3: Load into the staging relation. The scratch directory is
        // removed on every exit path of this step.
        let table = datasets::staging_table_name(&uid);
        let load_result = self
            .run_step(Some(uid), IngestStep::Load, &policies.load, || async {
                self.loader
                    .load(&ctx.scratch_file_path, &table)
                    .await
                    .map_err(|e| PipelineError::Transient(e.to_string()))
            })
            .await;
        self.remove_scratch(&ctx).await;
        load_result?;

        // Step 4: Finalize: compute metadata and push the terminal status.
        self.run_step(Some(uid), IngestStep::Finalize, &policies.finalize, || {
            self.finalize(uid, &table)
        })
        .await?;

        if let Err(e) = self.catalog.clear_run(uid).await {
            warn!(dataset_uid = %uid, error = %e, "failed to clear run state");
        }

        Ok(uid)
    }

    /// Execute one step with its retry policy. Attempt counts are persisted
    /// to the run-state table before each try so a supervisor can observe
    /// progress across process restarts.
    async fn run_step<T, F, Fut>(
        &self,
        uid: Option<Uuid>,
        step: IngestStep,
        policy: &StepPolicy,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut last_error = None;

        for attempt in 1..=policy.max_attempts {
            if let Some(uid) = uid {
                if let Err(e) = self.catalog.record_run_step(uid, step.as_str(), attempt).await {
                    warn!(dataset_uid = %uid, step = %step, error = %e, "failed to persist run step");
                }
            }

            match tokio::time::timeout(policy.timeout, op()).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if !e.is_retryable() => return Err(e),
                Ok(Err(e)) => {
                    warn!(
                        dataset_uid = ?uid, step = %step, attempt,
                        max_attempts = policy.max_attempts, error = %e,
                        "step attempt failed"
                    );
                    last_error = Some(e);
                }
                Err(_) => {
                    warn!(
                        dataset_uid = ?uid, step = %step, attempt,
                        timeout_secs = policy.timeout.as_secs(),
                        "step attempt timed out"
                    );
                    last_error = Some(PipelineError::Timeout(step, policy.timeout));
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| PipelineError::Transient(format!("step {} never ran", step))))
    }

    async fn fetch_to_scratch(&self, dataset: &Dataset) -> Result<RunContext, PipelineError> {
        let fetcher = self
            .fetchers
            .for_backend(dataset.storage_backend)
            .ok_or_else(|| {
                PipelineError::Unsupported(dataset.storage_backend.as_str().to_string())
            })?;

        // Each attempt gets its own scratch directory; a failed attempt
        // removes it before surfacing the error, and directories orphaned by
        // a cancelled attempt are swept before the next one starts.
        self.sweep_scratch(dataset.uid).await;
        let scratch_dir = self.scratch_root.join(format!(
            "geostage_{}_{}",
            dataset.uid.simple(),
            nanoid::nanoid!(8)
        ));
        tokio::fs::create_dir_all(&scratch_dir)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?;
        let scratch_file_path = scratch_dir.join(&dataset.file_name);

        match fetcher.fetch(&dataset.storage_uri, &scratch_file_path).await {
            Ok(()) => Ok(RunContext {
                uid: dataset.uid,
                scratch_dir,
                scratch_file_path,
            }),
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_dir_all(&scratch_dir).await {
                    warn!(path = %scratch_dir.display(), error = %rm, "failed to remove scratch dir");
                }
                Err(PipelineError::Transient(e.to_string()))
            }
        }
    }

    async fn finalize(&self, uid: Uuid, table: &str) -> Result<(), PipelineError> {
        let bbox = self
            .spatial
            .extent(table)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?
            .ok_or_else(|| {
                PipelineError::Data(format!("staging relation {} has no extent", table))
            })?;

        // The loader creates a synthetic single-column primary key; its
        // absence right after a load may be a timing artifact, so this is a
        // retryable data error rather than a terminal one.
        let primary_key = self
            .spatial
            .primary_key_column(table)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))?
            .ok_or_else(|| {
                PipelineError::Data(format!("staging relation {} has no primary key", table))
            })?;

        self.set_status(uid, StatusUpdate::ready(bbox, primary_key))
            .await?;
        Ok(())
    }

    async fn set_status(&self, uid: Uuid, update: StatusUpdate) -> Result<bool, PipelineError> {
        self.catalog
            .set_status(uid, update)
            .await
            .map_err(|e| PipelineError::Transient(e.to_string()))
    }

    /// Report terminal failure exactly once. Best-effort: the dataset may not
    /// exist when validation failed on a payload with an unknown uid.
    async fn report_failed(&self, uid: Uuid) {
        match self
            .catalog
            .set_status(uid, StatusUpdate::status_only(DatasetStatus::Failed))
            .await
        {
            Ok(_) => {}
            Err(e) => warn!(dataset_uid = %uid, error = %e, "failed to report failed status"),
        }
        if let Err(e) = self.catalog.clear_run(uid).await {
            warn!(dataset_uid = %uid, error = %e, "failed to clear run state");
        }
    }

    /// Remove every scratch directory belonging to this dataset's runs.
    async fn sweep_scratch(&self, uid: Uuid) {
        let prefix = format!("geostage_{}_", uid.simple());
        let mut entries = match tokio::fs::read_dir(&self.scratch_root).await {
            Ok(entries) => entries,
            Err(_) => return,
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if name.to_str().map_or(false, |n| n.starts_with(&prefix)) {
                if let Err(e) = tokio::fs::remove_dir_all(entry.path()).await {
                    warn!(
                        dataset_uid = %uid,
                        path = %entry.path().display(),
                        error = %e,
                        "failed to remove scratch dir"
                    );
                }
            }
        }
    }

    async fn remove_scratch(&self, ctx: &RunContext) {
        if let Err(e) = tokio::fs::remove_dir_all(&ctx.scratch_dir).await {
            warn!(
                dataset_uid = %ctx.uid,
                path = %ctx.scratch_dir.display(),
                error = %e,
                "failed to remove scratch dir"
            );
        }
    }
}
