//! Dataset domain model and naming rules.

pub mod validation;

pub use validation::validate_payload;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;
use uuid::Uuid;

/// Lifecycle of a dataset. Transitions are monotonic:
/// `uploaded -> processing -> {ready | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Uploaded,
    Processing,
    Ready,
    Failed,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DatasetStatus::Uploaded => "uploaded",
            DatasetStatus::Processing => "processing",
            DatasetStatus::Ready => "ready",
            DatasetStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploaded" => Some(DatasetStatus::Uploaded),
            "processing" => Some(DatasetStatus::Processing),
            "ready" => Some(DatasetStatus::Ready),
            "failed" => Some(DatasetStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DatasetStatus::Ready | DatasetStatus::Failed)
    }

    /// Whether `next` is a legal transition from this state.
    pub fn can_transition_to(&self, next: DatasetStatus) -> bool {
        match self {
            DatasetStatus::Uploaded => {
                matches!(next, DatasetStatus::Processing | DatasetStatus::Failed)
            }
            DatasetStatus::Processing => {
                matches!(next, DatasetStatus::Ready | DatasetStatus::Failed)
            }
            DatasetStatus::Ready | DatasetStatus::Failed => false,
        }
    }
}

impl std::fmt::Display for DatasetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the uploaded source file lives. Only the object-store backends are
/// fetchable today; the rest are declared for forward compatibility and fail
/// ingestion as unsupported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Minio,
    S3,
    Https,
    Sql,
    Bigquery,
}

impl StorageBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageBackend::Minio => "minio",
            StorageBackend::S3 => "s3",
            StorageBackend::Https => "https",
            StorageBackend::Sql => "sql",
            StorageBackend::Bigquery => "bigquery",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "minio" => Some(StorageBackend::Minio),
            "s3" => Some(StorageBackend::S3),
            "https" => Some(StorageBackend::Https),
            "sql" => Some(StorageBackend::Sql),
            "bigquery" => Some(StorageBackend::Bigquery),
            _ => None,
        }
    }
}

/// Axis-aligned bounding box of a dataset's geometries, in the working SRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub xmin: f64,
    pub ymin: f64,
    pub xmax: f64,
    pub ymax: f64,
}

/// Persistent dataset record.
///
/// `bbox` and `primary_key_column` are set together, exactly once, on the
/// transition into `ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub uid: Uuid,
    pub account_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub file_name: String,
    pub storage_backend: StorageBackend,
    pub storage_uri: String,
    pub status: DatasetStatus,
    pub bbox: Option<BoundingBox>,
    pub primary_key_column: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Name of the per-dataset staging relation in the spatial database.
pub fn staging_table_name(uid: &Uuid) -> String {
    format!("u_{}", uid.hyphenated().to_string().replace('-', "_"))
}

const MAX_NAME_LENGTH: usize = 100;

/// Derive a display name from an uploaded file name: strip the extension,
/// fold accented letters to ASCII, drop unsafe characters, collapse
/// whitespace/dash/underscore runs, truncate.
pub fn sanitize_dataset_name(file_name: &str) -> String {
    let base = match file_name.rfind('.') {
        Some(0) | None => file_name,
        Some(idx) => &file_name[..idx],
    };

    let mut out = String::with_capacity(base.len());
    let mut pending_space = false;
    // NFKD first, so accented letters fold to their base letter and the
    // combining marks fall through the filter.
    for c in base.nfkd() {
        if c.is_ascii_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
        } else if c.is_whitespace() || c == '-' || c == '_' {
            pending_space = true;
        }
        // anything else is dropped
    }

    if out.len() > MAX_NAME_LENGTH {
        out.truncate(MAX_NAME_LENGTH);
        while out.ends_with(' ') {
            out.pop();
        }
    }

    if out.is_empty() {
        "dataset".to_string()
    } else {
        out
    }
}

/// Resolve a display-name collision: `existing_count` is the number of datasets
/// the same account already owns with the same source file name. Best-effort
/// uniqueness aid, not an enforced constraint.
pub fn resolve_name_collision(name: &str, existing_count: i64) -> String {
    if existing_count > 0 {
        format!("{} ({})", name, existing_count)
    } else {
        name.to_string()
    }
}
