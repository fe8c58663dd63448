use crate::http::error::ApiError;
use crate::http::models::UploadResponse;
use crate::WideDbEngine;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;

/// Maximum upload size: 2GB
pub const MAX_UPLOAD_SIZE: usize = 2 * 1024 * 1024 * 1024;

/// Handler for POST /v1/datasets/{id}/upload - Load a CSV body into a dataset
///
/// The body is staged to disk and ingested in the background. The response
/// points at the operation to poll.
#[tracing::instrument(
    name = "handler_upload_dataset",
    skip(engine, body),
    fields(
        widedb.dataset_id = %id,
        widedb.operation_id = tracing::field::Empty,
        widedb.size_bytes = body.len(),
    )
)]
pub async fn upload_dataset(
    State(engine): State<Arc<WideDbEngine>>,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    // Reject unknown datasets before writing anything to disk
    engine.get_dataset(id).await?;

    let staged = engine.stage_upload(body).await?;
    let handle = engine.upload_dataset(id, Arc::new(staged)).await?;

    tracing::Span::current().record("widedb.operation_id", handle.operation_id);

    Ok((
        StatusCode::ACCEPTED,
        Json(UploadResponse {
            operation_id: handle.operation_id,
            url: handle.url,
        }),
    ))
}
