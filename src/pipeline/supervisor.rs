use super::IngestRunner;
use crate::catalog::DatasetCatalog;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Default scan interval for the resumption loop.
const DEFAULT_SCAN_INTERVAL: Duration = Duration::from_secs(60);

/// Default staleness threshold before a run is considered abandoned. Long
/// enough that an in-flight step (which touches its run row on every attempt)
/// is never re-run concurrently.
const DEFAULT_STALE_AFTER_SECS: i64 = 45 * 60;

/// Re-runs ingestion for datasets whose run state went stale, reproducing the
/// durable-execution guarantee of a workflow engine: after a process restart,
/// incomplete runs are picked up and driven to a terminal status.
///
/// Resumption restarts from the first step. The Load step's overwrite
/// semantics make a full restart idempotent, so no mid-step checkpointing is
/// required.
#[derive(Debug)]
pub struct PipelineSupervisor {
    catalog: Arc<dyn DatasetCatalog>,
    runner: Arc<IngestRunner>,
    scan_interval: Duration,
    stale_after_secs: i64,
}

impl PipelineSupervisor {
    pub fn new(catalog: Arc<dyn DatasetCatalog>, runner: Arc<IngestRunner>) -> Self {
        Self {
            catalog,
            runner,
            scan_interval: DEFAULT_SCAN_INTERVAL,
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
        }
    }

    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    pub fn with_stale_after_secs(mut self, secs: i64) -> Self {
        self.stale_after_secs = secs;
        self
    }

    /// Spawn the supervision loop: one scan immediately, then on an interval.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.scan_interval);
            loop {
                ticker.tick().await;
                self.resume_stalled().await;
            }
        })
    }

    /// One scan pass, also used directly by tests.
    pub async fn resume_stalled(&self) {
        let stalled = match self.catalog.list_stalled_runs(self.stale_after_secs).await {
            Ok(datasets) => datasets,
            Err(e) => {
                warn!(error = %e, "failed to scan for stalled runs");
                return;
            }
        };

        for dataset in stalled {
            info!(dataset_uid = %dataset.uid, status = %dataset.status, "resuming stalled run");
            let payload = match serde_json::to_value(&dataset) {
                Ok(v) => v,
                Err(e) => {
                    warn!(dataset_uid = %dataset.uid, error = %e, "failed to serialize dataset");
                    continue;
                }
            };
            let runner = self.runner.clone();
            tokio::spawn(async move {
                let _ = runner.run(payload).await;
            });
        }
    }
}
