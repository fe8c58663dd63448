pub mod catalog;
pub mod config;
pub mod datasets;
mod engine;
pub mod http;
pub mod ingest;
pub mod operation;
pub mod telemetry;

pub use engine::{
    dataset_url, operation_url, CreatedDataset, DatasetList, UploadHandle, WideDbEngine,
    WideDbEngineBuilder, MAX_DATASETS_LIMIT,
};
