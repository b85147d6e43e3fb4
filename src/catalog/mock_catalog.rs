//! In-memory catalog for tests. Enforces the same monotonic status rules as
//! the Postgres implementation and records every transition it observes so
//! tests can assert ordering.

use super::manager::{DatasetCatalog, StatusUpdate};
use crate::datasets::{Dataset, DatasetStatus};
use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct RunState {
    pub step: String,
    pub attempt: u32,
}

#[derive(Debug, Default)]
pub struct MockCatalog {
    datasets: Mutex<HashMap<Uuid, Dataset>>,
    runs: Mutex<HashMap<Uuid, RunState>>,
    run_history: Mutex<Vec<(Uuid, String, u32)>>,
    status_log: Mutex<Vec<(Uuid, DatasetStatus)>>,
    fail_set_status: AtomicBool,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a dataset directly, bypassing creation-time rules.
    pub fn insert(&self, dataset: Dataset) {
        self.datasets.lock().unwrap().insert(dataset.uid, dataset);
    }

    /// Every status transition applied through `set_status`, in order.
    pub fn status_log(&self, uid: Uuid) -> Vec<DatasetStatus> {
        self.status_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _)| *u == uid)
            .map(|(_, s)| *s)
            .collect()
    }

    /// Last recorded run state for a uid, if the run row still exists.
    pub fn run_state(&self, uid: Uuid) -> Option<RunState> {
        self.runs.lock().unwrap().get(&uid).cloned()
    }

    /// Every `(step, attempt)` persisted for a uid, in order, surviving
    /// `clear_run`.
    pub fn run_history(&self, uid: Uuid) -> Vec<(String, u32)> {
        self.run_history
            .lock()
            .unwrap()
            .iter()
            .filter(|(u, _, _)| *u == uid)
            .map(|(_, step, attempt)| (step.clone(), *attempt))
            .collect()
    }

    pub fn set_fail_set_status(&self, fail: bool) {
        self.fail_set_status.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl DatasetCatalog for MockCatalog {
    async fn create_dataset(&self, dataset: &Dataset) -> Result<()> {
        let mut datasets = self.datasets.lock().unwrap();
        if datasets.contains_key(&dataset.uid) {
            bail!("duplicate dataset uid {}", dataset.uid);
        }
        datasets.insert(dataset.uid, dataset.clone());
        Ok(())
    }

    async fn get_dataset(&self, uid: Uuid) -> Result<Option<Dataset>> {
        Ok(self.datasets.lock().unwrap().get(&uid).cloned())
    }

    async fn get_dataset_for_account(
        &self,
        uid: Uuid,
        account_id: i64,
    ) -> Result<Option<Dataset>> {
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .get(&uid)
            .filter(|d| d.account_id == account_id)
            .cloned())
    }

    async fn list_datasets(
        &self,
        account_id: i64,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Dataset>> {
        let mut datasets: Vec<Dataset> = self
            .datasets
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.account_id == account_id)
            .cloned()
            .collect();
        datasets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(datasets
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn count_by_file_name(&self, account_id: i64, file_name: &str) -> Result<i64> {
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.account_id == account_id && d.file_name == file_name)
            .count() as i64)
    }

    async fn set_status(&self, uid: Uuid, update: StatusUpdate) -> Result<bool> {
        if self.fail_set_status.load(Ordering::SeqCst) {
            bail!("simulated catalog failure");
        }

        let mut datasets = self.datasets.lock().unwrap();
        let Some(dataset) = datasets.get_mut(&uid) else {
            bail!("dataset {} not found", uid);
        };

        if !dataset.status.can_transition_to(update.status) {
            // Identical repeats are idempotent no-ops.
            return Ok(dataset.status == update.status);
        }

        dataset.status = update.status;
        // bbox and primary_key_column only travel with the ready transition.
        if update.status == DatasetStatus::Ready {
            if let Some(bbox) = update.bbox {
                dataset.bbox = Some(bbox);
            }
            if let Some(pk) = update.primary_key_column {
                dataset.primary_key_column = Some(pk);
            }
        }
        dataset.updated_at = Utc::now();

        self.status_log.lock().unwrap().push((uid, update.status));
        Ok(true)
    }

    async fn record_run_step(&self, uid: Uuid, step: &str, attempt: u32) -> Result<()> {
        self.runs.lock().unwrap().insert(
            uid,
            RunState {
                step: step.to_string(),
                attempt,
            },
        );
        self.run_history
            .lock()
            .unwrap()
            .push((uid, step.to_string(), attempt));
        Ok(())
    }

    async fn clear_run(&self, uid: Uuid) -> Result<()> {
        self.runs.lock().unwrap().remove(&uid);
        Ok(())
    }

    async fn list_stalled_runs(&self, _stale_secs: i64) -> Result<Vec<Dataset>> {
        let runs = self.runs.lock().unwrap();
        Ok(self
            .datasets
            .lock()
            .unwrap()
            .values()
            .filter(|d| !d.status.is_terminal() && runs.contains_key(&d.uid))
            .cloned()
            .collect())
    }
}
