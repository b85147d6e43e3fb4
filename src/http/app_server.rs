use crate::http::controllers::{datasets_controller, features_controller, health_controller};
use crate::GeoStageEngine;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;

pub struct AppServer {
    pub router: Router,
    pub engine: Arc<GeoStageEngine>,
}

pub const PATH_HEALTH: &str = "/health";
pub const PATH_DATASETS: &str = "/v1/datasets";
pub const PATH_DATASET: &str = "/v1/datasets/:uid";
pub const PATH_DATASET_TABLE: &str = "/v1/datasets/:uid/table";
pub const PATH_DATASET_FEATURES: &str = "/v1/datasets/:uid/features";
pub const PATH_DATASET_TILE: &str = "/v1/datasets/:uid/tiles/:z/:x/:y";

impl AppServer {
    pub fn new(engine: GeoStageEngine) -> Self {
        let engine = Arc::new(engine);
        AppServer {
            router: Router::new()
                .route(PATH_HEALTH, get(health_controller::health))
                .route(
                    PATH_DATASETS,
                    get(datasets_controller::list_datasets)
                        .post(datasets_controller::create_dataset),
                )
                .route(
                    PATH_DATASET,
                    get(datasets_controller::get_dataset)
                        .put(datasets_controller::update_dataset),
                )
                .route(PATH_DATASET_TABLE, get(features_controller::read_table))
                .route(
                    PATH_DATASET_FEATURES,
                    get(features_controller::read_features),
                )
                .route(PATH_DATASET_TILE, get(features_controller::read_tile))
                .with_state(engine.clone()),
            engine,
        }
    }
}
