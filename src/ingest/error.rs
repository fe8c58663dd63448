//! Error types for CSV ingestion

use thiserror::Error;

use crate::operation::OperationError;

/// Errors that can fail an ingestion operation
#[derive(Debug, Error)]
pub enum IngestError {
    /// The CSV reader rejected the input (including invalid UTF-8)
    #[error("csv read failed: {0}")]
    Csv(#[from] csv::Error),

    /// The staged upload could not be opened or read
    #[error("source read failed: {0}")]
    Io(#[from] std::io::Error),

    /// A bulk load statement failed
    #[error("bulk load failed: {0}")]
    Database(#[from] sqlx::Error),

    /// A catalog call outside of bulk loading failed
    #[error("catalog error: {0}")]
    Catalog(#[from] anyhow::Error),

    /// A row handed to a batch writer does not match the table's column list
    #[error("row for table '{table}' has {actual} values, expected {expected}")]
    RowArity {
        table: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Data rows and the operation's records ran out at different points
    #[error("csv rows and upload records do not line up at row {row}")]
    RowRecordMismatch { row: usize },

    /// The operation state machine refused a transition
    #[error(transparent)]
    Operation(#[from] OperationError),
}
