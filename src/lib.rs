pub mod catalog;
pub mod config;
pub mod datasets;
mod engine;
pub mod http;
pub mod loader;
pub mod pipeline;
pub mod spatial;
pub mod storage;

pub use engine::{GeoStageEngine, GeoStageEngineBuilder, NewDataset};
