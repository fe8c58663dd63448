use crate::http::controllers::{
    create_dataset, get_data, get_dataset, get_headers, get_operation, health_handler,
    list_datasets, upload_dataset, MAX_UPLOAD_SIZE,
};
use crate::WideDbEngine;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

pub struct AppServer {
    pub router: Router,
    pub engine: Arc<WideDbEngine>,
}

pub const PATH_HEALTH: &str = "/health";
pub const PATH_DATASETS: &str = "/v1/datasets";
pub const PATH_DATASET: &str = "/v1/datasets/{id}";
pub const PATH_DATASET_UPLOAD: &str = "/v1/datasets/{id}/upload";
pub const PATH_DATASET_HEADERS: &str = "/v1/datasets/{id}/headers";
pub const PATH_DATASET_DATA: &str = "/v1/datasets/{id}/data";
pub const PATH_OPERATION: &str = "/v1/operations/{id}";

impl AppServer {
    pub fn new(engine: WideDbEngine) -> Self {
        let engine = Arc::new(engine);
        AppServer {
            router: Router::new()
                .route(PATH_HEALTH, get(health_handler))
                .route(PATH_DATASETS, post(create_dataset).get(list_datasets))
                .route(PATH_DATASET, get(get_dataset))
                .route(
                    PATH_DATASET_UPLOAD,
                    post(upload_dataset).layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE)),
                )
                .route(PATH_DATASET_HEADERS, get(get_headers))
                .route(PATH_DATASET_DATA, get(get_data))
                .route(PATH_OPERATION, get(get_operation))
                .with_state(engine.clone()),
            engine,
        }
    }
}
