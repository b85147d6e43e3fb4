//! Metadata store for dataset records and ingestion run state.

pub mod manager;
pub mod mock_catalog;
pub mod postgres_manager;

pub use manager::{DatasetCatalog, StatusUpdate};
pub use mock_catalog::MockCatalog;
pub use postgres_manager::PostgresCatalog;
