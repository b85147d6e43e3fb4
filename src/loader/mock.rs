//! Configurable mock loader for pipeline tests.

use super::{LoadError, SpatialLoader};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

/// Records every load call and optionally fails the first N.
#[derive(Debug, Default)]
pub struct MockLoader {
    calls: Mutex<Vec<(PathBuf, String)>>,
    fail_first: AtomicU32,
}

impl MockLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// `(input, table)` pairs in call order.
    pub fn calls(&self) -> Vec<(PathBuf, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SpatialLoader for MockLoader {
    async fn load(&self, input: &Path, table: &str) -> Result<(), LoadError> {
        self.calls
            .lock()
            .unwrap()
            .push((input.to_path_buf(), table.to_string()));

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(LoadError::Conversion {
                code: Some(1),
                stderr: "simulated conversion failure".to_string(),
            });
        }

        Ok(())
    }
}
