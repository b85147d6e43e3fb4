//! Ingestion pipeline: a four-step durable state machine
//! (Validate -> Fetch -> Load -> Finalize) with per-step retry policy.

pub mod runner;
pub mod supervisor;

pub use runner::IngestRunner;
pub use supervisor::PipelineSupervisor;

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// The discrete steps of an ingestion run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStep {
    Validate,
    Fetch,
    Load,
    Finalize,
}

impl IngestStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestStep::Validate => "validate",
            IngestStep::Fetch => "fetch",
            IngestStep::Load => "load",
            IngestStep::Finalize => "finalize",
        }
    }
}

impl std::fmt::Display for IngestStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy for a single step. A timed-out attempt counts against
/// `max_attempts` like any other failed attempt.
#[derive(Debug, Clone, Copy)]
pub struct StepPolicy {
    pub timeout: Duration,
    pub max_attempts: u32,
}

/// Per-step policies for a full run.
#[derive(Debug, Clone, Copy)]
pub struct PipelinePolicies {
    pub validate: StepPolicy,
    pub fetch: StepPolicy,
    pub load: StepPolicy,
    pub finalize: StepPolicy,
}

impl Default for PipelinePolicies {
    fn default() -> Self {
        Self {
            validate: StepPolicy {
                timeout: Duration::from_secs(15),
                max_attempts: 1,
            },
            fetch: StepPolicy {
                timeout: Duration::from_secs(10 * 60),
                max_attempts: 3,
            },
            load: StepPolicy {
                timeout: Duration::from_secs(30 * 60),
                max_attempts: 3,
            },
            finalize: StepPolicy {
                timeout: Duration::from_secs(30 * 60),
                max_attempts: 3,
            },
        }
    }
}

/// Transient working state passed from Fetch to Load. The scratch directory is
/// removed on every exit path of the Load step.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub uid: Uuid,
    pub scratch_dir: PathBuf,
    pub scratch_file_path: PathBuf,
}

/// Error taxonomy for ingestion steps. Only `Transient`, `Data`, and `Timeout`
/// are retried; the rest terminate the step immediately.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed input payload. Never retried.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Storage backend with no registered fetcher. Never retried.
    #[error("unsupported storage backend: {0}")]
    Unsupported(String),

    /// Network/storage/process failure that may succeed on retry.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Unexpected state of the loaded data, e.g. a missing primary key.
    /// Retried in case it is a loader-timing artifact.
    #[error("data error: {0}")]
    Data(String),

    /// Step exceeded its timeout.
    #[error("step {0} timed out after {1:?}")]
    Timeout(IngestStep, Duration),
}

impl PipelineError {
    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Validation(_) | PipelineError::Unsupported(_) => false,
            PipelineError::Transient(_) | PipelineError::Data(_) | PipelineError::Timeout(..) => {
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policies_match_step_contracts() {
        let p = PipelinePolicies::default();
        assert_eq!(p.validate.max_attempts, 1);
        assert_eq!(p.validate.timeout, Duration::from_secs(15));
        assert_eq!(p.fetch.max_attempts, 3);
        assert_eq!(p.fetch.timeout, Duration::from_secs(600));
        assert_eq!(p.load.max_attempts, 3);
        assert_eq!(p.load.timeout, Duration::from_secs(1800));
        assert_eq!(p.finalize.max_attempts, 3);
        assert_eq!(p.finalize.timeout, Duration::from_secs(1800));
    }

    #[test]
    fn retryability_by_variant() {
        assert!(!PipelineError::Validation("x".into()).is_retryable());
        assert!(!PipelineError::Unsupported("https".into()).is_retryable());
        assert!(PipelineError::Transient("x".into()).is_retryable());
        assert!(PipelineError::Data("x".into()).is_retryable());
        assert!(
            PipelineError::Timeout(IngestStep::Fetch, Duration::from_secs(1)).is_retryable()
        );
    }
}
