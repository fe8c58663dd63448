use crate::http::error::ApiError;
use crate::http::models::OperationResponse;
use crate::WideDbEngine;
use axum::{
    extract::{Path, State},
    Json,
};
use std::sync::Arc;

/// Handler for GET /v1/operations/{id} - Poll an upload
#[tracing::instrument(name = "handler_get_operation", skip(engine), fields(widedb.operation_id = %id))]
pub async fn get_operation(
    State(engine): State<Arc<WideDbEngine>>,
    Path(id): Path<i64>,
) -> Result<Json<OperationResponse>, ApiError> {
    let operation = engine.get_operation(id).await?;
    Ok(Json(operation.into()))
}
