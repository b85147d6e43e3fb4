//! Validation of the serialized dataset payload handed to the ingestion
//! pipeline. Malformed payloads are terminal; they will not become valid by
//! retrying.

use super::Dataset;
use crate::pipeline::PipelineError;

/// Parse and typecheck a workflow input payload into a [`Dataset`].
pub fn validate_payload(payload: &serde_json::Value) -> Result<Dataset, PipelineError> {
    let dataset: Dataset = serde_json::from_value(payload.clone())
        .map_err(|e| PipelineError::Validation(format!("malformed dataset payload: {}", e)))?;

    if dataset.uid.is_nil() {
        return Err(PipelineError::Validation("dataset uid is nil".to_string()));
    }
    if dataset.file_name.trim().is_empty() {
        return Err(PipelineError::Validation(
            "dataset file_name is empty".to_string(),
        ));
    }
    if dataset.storage_uri.trim().is_empty() {
        return Err(PipelineError::Validation(
            "dataset storage_uri is empty".to_string(),
        ));
    }

    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{DatasetStatus, StorageBackend};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn payload() -> serde_json::Value {
        json!({
            "uid": Uuid::new_v4(),
            "account_id": 7,
            "name": "roads",
            "description": null,
            "file_name": "roads.geojson",
            "storage_backend": "minio",
            "storage_uri": "s3://uploads/roads.geojson",
            "status": "uploaded",
            "bbox": null,
            "primary_key_column": null,
            "created_at": Utc::now(),
            "updated_at": Utc::now(),
        })
    }

    #[test]
    fn accepts_well_formed_payload() {
        let dataset = validate_payload(&payload()).unwrap();
        assert_eq!(dataset.status, DatasetStatus::Uploaded);
        assert_eq!(dataset.storage_backend, StorageBackend::Minio);
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut p = payload();
        p["storage_backend"] = json!("ftp");
        assert!(matches!(
            validate_payload(&p),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn rejects_missing_fields() {
        let mut p = payload();
        p.as_object_mut().unwrap().remove("storage_uri");
        assert!(matches!(
            validate_payload(&p),
            Err(PipelineError::Validation(_))
        ));
    }

    #[test]
    fn rejects_empty_file_name() {
        let mut p = payload();
        p["file_name"] = json!("  ");
        assert!(matches!(
            validate_payload(&p),
            Err(PipelineError::Validation(_))
        ));
    }
}
