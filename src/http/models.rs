use crate::catalog::{DatasetInfo, HeaderInfo};
use crate::datasets::{ColumnData, DataCursor};
use crate::engine::dataset_url;
use crate::operation::{Operation, OperationStatus};
use serde::{Deserialize, Serialize};

/// Request body for POST /v1/datasets
#[derive(Debug, Default, Deserialize)]
pub struct CreateDatasetRequest {
    #[serde(default)]
    pub display_name: Option<String>,
}

/// Response body for POST /v1/datasets
#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDatasetResponse {
    pub id: i64,
    pub display_name: String,
    pub url: String,
}

/// Dataset metadata for API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetResponse {
    pub id: i64,
    pub display_name: String,
    pub headers_set: bool,
    pub num_records: i64,
    pub min_record_id: Option<i64>,
    pub max_record_id: Option<i64>,
    pub created_at: String,
    pub url: String,
}

impl From<DatasetInfo> for DatasetResponse {
    fn from(d: DatasetInfo) -> Self {
        Self {
            url: dataset_url(d.id),
            id: d.id,
            display_name: d.display_name,
            headers_set: d.headers_set,
            num_records: d.num_records,
            min_record_id: d.min_record_id,
            max_record_id: d.max_record_id,
            created_at: d.created_at,
        }
    }
}

/// Response body for GET /v1/datasets
#[derive(Debug, Serialize, Deserialize)]
pub struct ListDatasetsResponse {
    pub datasets: Vec<DatasetResponse>,
    pub total_count: i64,
}

/// Response body for POST /v1/datasets/{id}/upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub operation_id: i64,
    pub url: String,
}

/// Single header for API responses
#[derive(Debug, Serialize, Deserialize)]
pub struct HeaderResponse {
    pub id: i64,
    pub display_name: String,
    pub column_index: i64,
    pub value_type: String,
}

impl From<HeaderInfo> for HeaderResponse {
    fn from(h: HeaderInfo) -> Self {
        Self {
            id: h.id,
            display_name: h.display_name,
            column_index: h.column_index,
            value_type: h.value_type,
        }
    }
}

/// Response body for GET /v1/datasets/{id}/headers
#[derive(Debug, Serialize, Deserialize)]
pub struct HeadersResponse {
    pub dataset_id: i64,
    pub headers: Vec<HeaderResponse>,
}

/// Continuation of a data read
#[derive(Debug, Serialize, Deserialize)]
pub struct NextPage {
    /// Ready-made request for the next page
    pub url: String,
    pub cursor: DataCursor,
}

/// Response body for GET /v1/datasets/{id}/data
#[derive(Debug, Serialize, Deserialize)]
pub struct DataResponse {
    pub dataset_id: i64,
    pub columns: Vec<ColumnData>,
    pub next: Option<NextPage>,
}

/// Response body for GET /v1/operations/{id}
#[derive(Debug, Serialize, Deserialize)]
pub struct OperationResponse {
    pub id: i64,
    pub dataset_id: i64,
    pub status: OperationStatus,
    pub done: bool,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Operation> for OperationResponse {
    fn from(op: Operation) -> Self {
        Self {
            done: op.is_complete(),
            id: op.id,
            dataset_id: op.dataset_id,
            status: op.status,
            error_message: op.error_message,
            created_at: op.created_at,
            updated_at: op.updated_at,
        }
    }
}
