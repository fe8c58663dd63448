use super::IngestError;
use async_trait::async_trait;

/// A single column value handed to a bulk load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Int(i64),
    Text(String),
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

/// Summary returned when a BatchWriter is closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchWriteResult {
    /// Total number of rows written.
    pub rows: usize,
    /// Number of committed batches.
    pub batches: usize,
}

/// A trait for loading rows of a fixed shape into one catalog table.
///
/// Implementors must follow this lifecycle:
/// 1. `write(row)` - Buffer a row (can be called zero or more times); a full
///    buffer is flushed in its own transaction
/// 2. `close()` - Flush the remainder and return statistics (consumes the writer)
///
/// Rows are positional and must match the column list of the target table.
#[async_trait]
pub trait BatchWriter: Send {
    /// Buffer one row. May flush a batch.
    async fn write(&mut self, row: Vec<SqlValue>) -> Result<(), IngestError>;

    /// Flush whatever is still buffered and return write statistics.
    /// Consumes self to enforce the lifecycle.
    async fn close(self: Box<Self>) -> Result<BatchWriteResult, IngestError>;
}
