use crate::ingest::BatchWriter;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt::Debug;

/// Headers are stored with gaps between neighbouring positions so a column
/// can later be placed between two existing ones without renumbering.
pub const COLUMN_INDEX_INCREMENT: i64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DatasetInfo {
    pub id: i64,
    pub display_name: String,
    pub headers_set: bool,
    pub num_records: i64,
    pub min_record_id: Option<i64>,
    pub max_record_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct HeaderInfo {
    pub id: i64,
    pub dataset_id: i64,
    pub display_name: String,
    /// Logical left-to-right position (0-based).
    pub column_index: i64,
    pub value_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OperationInfo {
    pub id: i64,
    pub dataset_id: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// One stored (row, column) value as returned by a page scan.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct CellValue {
    pub record_id: i64,
    pub header_id: i64,
    pub raw_value: String,
}

/// Type hint carried by a header. Values are never coerced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueType {
    Raw,
    Int,
    Float,
}

impl ValueType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Int => "INT",
            Self::Float => "FLOAT",
        }
    }
}

/// Tables that accept bulk loads, with the columns each load fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkTable {
    Headers,
    Records,
    Cells,
    RecordsProcessed,
}

impl BulkTable {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Headers => "headers",
            Self::Records => "records",
            Self::Cells => "cells",
            Self::RecordsProcessed => "records_processed",
        }
    }

    pub const fn columns(&self) -> &'static [&'static str] {
        match self {
            Self::Headers => &["dataset_id", "display_name", "value_type"],
            Self::Records => &["operation_id", "dataset_id"],
            Self::Cells => &["record_id", "header_id", "operation_id", "raw_value"],
            Self::RecordsProcessed => &["record_id", "dataset_id"],
        }
    }
}

/// Async interface for catalog operations.
///
/// Lookups by id return `Ok(None)` when the row does not exist; `Err` means
/// the answer could not be determined.
#[async_trait]
pub trait CatalogManager: Debug + Send + Sync {
    /// Close the catalog connection. This is idempotent and can be called multiple times.
    async fn close(&self) -> Result<()> {
        // sqlx pools handle cleanup automatically
        Ok(())
    }

    /// Apply any pending schema migrations. Should be idempotent.
    async fn run_migrations(&self) -> Result<()>;

    // Datasets

    /// Create a dataset. An empty `display_name` becomes `untitled-<id>`.
    async fn create_dataset(&self, display_name: &str) -> Result<DatasetInfo>;
    async fn get_dataset(&self, id: i64) -> Result<Option<DatasetInfo>>;
    async fn list_datasets(&self, limit: i64) -> Result<Vec<DatasetInfo>>;
    async fn count_datasets(&self) -> Result<i64>;
    async fn set_headers_set(&self, dataset_id: i64, headers_set: bool) -> Result<()>;

    /// Recompute `num_records`, `min_record_id` and `max_record_id` from the
    /// processed-records accounting table. Safe to run concurrently with an
    /// ingestion; the last writer wins and every writer stores a fresh aggregate.
    async fn update_num_records(&self, dataset_id: i64) -> Result<()>;

    // Headers

    async fn create_header(
        &self,
        dataset_id: i64,
        display_name: &str,
        column_index: i64,
    ) -> Result<HeaderInfo>;

    /// Headers of a dataset ordered by (column index, id).
    async fn list_headers(&self, dataset_id: i64) -> Result<Vec<HeaderInfo>>;
    async fn set_column_index(&self, header_id: i64, column_index: i64) -> Result<()>;

    // Records and cells

    /// Ids of records created by an operation, strictly after `after_id`, ascending.
    async fn list_record_ids(&self, operation_id: i64, after_id: i64, limit: i64)
        -> Result<Vec<i64>>;

    /// Largest record id of a dataset, if it has any record.
    async fn max_record_id(&self, dataset_id: i64) -> Result<Option<i64>>;

    /// Largest id among the first `limit` records of a dataset after `after_id`.
    async fn page_upper_bound(
        &self,
        dataset_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Option<i64>>;

    /// Cells of the given headers with `after_id < record_id <= upper_bound`,
    /// ordered by (header_id, record_id).
    async fn list_cells(
        &self,
        header_ids: &[i64],
        after_id: i64,
        upper_bound: i64,
    ) -> Result<Vec<CellValue>>;

    // Operations

    /// Create a NOT_STARTED operation for a dataset. Returns `Ok(None)` when
    /// another operation on the same dataset is still in flight.
    async fn create_operation(&self, dataset_id: i64) -> Result<Option<OperationInfo>>;
    async fn get_operation(&self, id: i64) -> Result<Option<OperationInfo>>;
    async fn update_operation_status(
        &self,
        id: i64,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()>;

    /// Mark every NOT_STARTED or RUNNING operation as FAILED. Returns how
    /// many operations were touched.
    async fn fail_interrupted_operations(&self, message: &str) -> Result<u64>;

    // Bulk loading

    /// Open a buffered writer that loads rows into `table` in transactions of
    /// at most `batch_size` rows.
    async fn open_batch_writer(
        &self,
        table: BulkTable,
        batch_size: usize,
    ) -> Result<Box<dyn BatchWriter>>;
}
