use super::{LoadError, SpatialLoader};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

pub const DEFAULT_TARGET_SRS: &str = "EPSG:4326";
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geom";

/// Invokes the external `ogr2ogr` conversion tool to load a source file into
/// PostGIS. The subprocess is a trust boundary: only its exit status and
/// stderr are part of the contract, stdout is never parsed.
#[derive(Debug, Clone)]
pub struct Ogr2OgrLoader {
    binary: String,
    pg_dsn: String,
    target_srs: String,
    geometry_column: String,
}

impl Ogr2OgrLoader {
    /// `pg_dsn` is a libpq keyword/value string, e.g.
    /// `host=localhost port=5432 dbname=gis user=gis password=gis`.
    pub fn new(binary: &str, pg_dsn: &str) -> Self {
        Self {
            binary: binary.to_string(),
            pg_dsn: pg_dsn.to_string(),
            target_srs: DEFAULT_TARGET_SRS.to_string(),
            geometry_column: DEFAULT_GEOMETRY_COLUMN.to_string(),
        }
    }

    pub fn with_target_srs(mut self, srs: &str) -> Self {
        self.target_srs = srs.to_string();
        self
    }

    pub fn with_geometry_column(mut self, column: &str) -> Self {
        self.geometry_column = column.to_string();
        self
    }

    fn build_args(&self, input: &Path, table: &str) -> Vec<String> {
        vec![
            "-f".to_string(),
            "PostgreSQL".to_string(),
            format!("PG:{}", self.pg_dsn),
            input.display().to_string(),
            "-nln".to_string(),
            table.to_string(),
            "-a_srs".to_string(),
            self.target_srs.clone(),
            "-lco".to_string(),
            format!("GEOMETRY_NAME={}", self.geometry_column),
            "-overwrite".to_string(),
        ]
    }
}

#[async_trait]
impl SpatialLoader for Ogr2OgrLoader {
    async fn load(&self, input: &Path, table: &str) -> Result<(), LoadError> {
        let args = self.build_args(input, table);
        debug!(binary = %self.binary, table = %table, "invoking conversion process");

        let output = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            return Err(LoadError::Conversion {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        info!(table = %table, "staging relation loaded");
        Ok(())
    }
}
