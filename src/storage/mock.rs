//! Configurable mock fetcher for pipeline tests.

use super::{FetchError, SourceFetcher};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Writes fixed content to the destination, optionally failing the first N
/// calls or sleeping before completing (to exercise retry and timeout paths).
#[derive(Debug, Default)]
pub struct MockFetcher {
    content: Vec<u8>,
    fail_first: AtomicU32,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl MockFetcher {
    pub fn new(content: &[u8]) -> Self {
        Self {
            content: content.to_vec(),
            ..Self::default()
        }
    }

    /// Fail the first `n` fetch calls with a transient download error.
    pub fn fail_first(self, n: u32) -> Self {
        self.fail_first.store(n, Ordering::SeqCst);
        self
    }

    /// Sleep before every fetch completes.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceFetcher for MockFetcher {
    async fn fetch(&self, _storage_uri: &str, dest: &Path) -> Result<(), FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err(FetchError::Download("simulated network failure".into()));
        }

        tokio::fs::write(dest, &self.content).await?;
        Ok(())
    }
}
