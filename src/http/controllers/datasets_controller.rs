use crate::http::error::ApiError;
use crate::http::models::{
    CreateDatasetRequest, CreateDatasetResponse, DatasetResponse, HeadersResponse,
    ListDatasetsResponse,
};
use crate::WideDbEngine;
use axum::{
    extract::{Path, Query as QueryParams, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

/// Default limit for listing datasets
const DEFAULT_DATASETS_LIMIT: i64 = 100;

/// Query parameters for listing datasets
#[derive(Debug, Deserialize)]
pub struct ListDatasetsParams {
    /// Maximum number of datasets to return (default: 100, max: 1000)
    pub limit: Option<i64>,
}

/// Handler for POST /v1/datasets - Create a dataset
#[tracing::instrument(
    name = "handler_create_dataset",
    skip(engine, request),
    fields(widedb.dataset_id = tracing::field::Empty)
)]
pub async fn create_dataset(
    State(engine): State<Arc<WideDbEngine>>,
    request: Option<Json<CreateDatasetRequest>>,
) -> Result<(StatusCode, Json<CreateDatasetResponse>), ApiError> {
    let Json(request) = request.unwrap_or_default();
    let created = engine
        .create_dataset(request.display_name.as_deref())
        .await?;

    tracing::Span::current().record("widedb.dataset_id", created.dataset.id);

    Ok((
        StatusCode::CREATED,
        Json(CreateDatasetResponse {
            id: created.dataset.id,
            display_name: created.dataset.display_name,
            url: created.url,
        }),
    ))
}

/// Handler for GET /v1/datasets - List datasets
#[tracing::instrument(
    name = "handler_list_datasets",
    skip(engine),
    fields(widedb.dataset_count = tracing::field::Empty)
)]
pub async fn list_datasets(
    State(engine): State<Arc<WideDbEngine>>,
    QueryParams(params): QueryParams<ListDatasetsParams>,
) -> Result<Json<ListDatasetsResponse>, ApiError> {
    let limit = match params.limit {
        Some(n) if n > 0 => n,
        _ => DEFAULT_DATASETS_LIMIT,
    };
    let list = engine.list_datasets(limit).await?;

    tracing::Span::current().record("widedb.dataset_count", list.datasets.len());

    Ok(Json(ListDatasetsResponse {
        datasets: list.datasets.into_iter().map(Into::into).collect(),
        total_count: list.total_count,
    }))
}

/// Handler for GET /v1/datasets/{id} - Get dataset details
#[tracing::instrument(name = "handler_get_dataset", skip(engine), fields(widedb.dataset_id = %id))]
pub async fn get_dataset(
    State(engine): State<Arc<WideDbEngine>>,
    Path(id): Path<i64>,
) -> Result<Json<DatasetResponse>, ApiError> {
    let dataset = engine.get_dataset(id).await?;
    Ok(Json(dataset.into()))
}

/// Handler for GET /v1/datasets/{id}/headers - Get a dataset's columns
#[tracing::instrument(name = "handler_get_headers", skip(engine), fields(widedb.dataset_id = %id))]
pub async fn get_headers(
    State(engine): State<Arc<WideDbEngine>>,
    Path(id): Path<i64>,
) -> Result<Json<HeadersResponse>, ApiError> {
    let headers = engine.get_headers(id).await?;
    Ok(Json(HeadersResponse {
        dataset_id: id,
        headers: headers.into_iter().map(Into::into).collect(),
    }))
}
