//! Multi-row INSERT implementation of [`BatchWriter`].

use crate::catalog::backend::CatalogDatabase;
use crate::catalog::manager::BulkTable;
use crate::ingest::{BatchWriteResult, BatchWriter, IngestError, SqlValue};
use async_trait::async_trait;
use sqlx::{query, Database, Encode, Executor, IntoArguments, Pool, Postgres, Sqlite, Type};

/// Buffers rows for one table and loads each batch in its own short
/// transaction. A batch is written as one multi-row INSERT, or several when
/// it would exceed the backend's bind parameter limit.
///
/// A writer session can therefore span several physical transactions: a
/// failure part-way through leaves the earlier batches committed.
pub struct SqlBatchWriter<DB: CatalogDatabase> {
    pool: Pool<DB>,
    table: BulkTable,
    batch_size: usize,
    buffer: Vec<Vec<SqlValue>>,
    rows_written: usize,
    batches: usize,
}

impl<DB: CatalogDatabase> SqlBatchWriter<DB> {
    pub fn new(pool: Pool<DB>, table: BulkTable, batch_size: usize) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            pool,
            table,
            batch_size,
            buffer: Vec::with_capacity(batch_size),
            rows_written: 0,
            batches: 0,
        }
    }

    fn push(&mut self, row: Vec<SqlValue>) -> Result<(), IngestError> {
        let expected = self.table.columns().len();
        if row.len() != expected {
            return Err(IngestError::RowArity {
                table: self.table.name(),
                expected,
                actual: row.len(),
            });
        }
        self.buffer.push(row);
        Ok(())
    }

    fn is_full(&self) -> bool {
        self.buffer.len() >= self.batch_size
    }

    /// Rows that fit in one INSERT without passing the bind parameter limit.
    fn rows_per_statement(&self) -> usize {
        (DB::MAX_BIND_PARAMS / self.table.columns().len()).max(1)
    }

    fn insert_sql(&self, rows: usize) -> String {
        let columns = self.table.columns();
        let mut sql = format!(
            "INSERT INTO {} ({}) VALUES ",
            self.table.name(),
            columns.join(", ")
        );

        let mut index = 1;
        for row in 0..rows {
            if row > 0 {
                sql.push_str(", ");
            }
            sql.push('(');
            for column in 0..columns.len() {
                if column > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&DB::bind_param(index));
                index += 1;
            }
            sql.push(')');
        }
        sql
    }
}

impl<DB> SqlBatchWriter<DB>
where
    DB: CatalogDatabase,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB> + Send,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
{
    async fn flush(&mut self) -> Result<(), IngestError> {
        if self.buffer.is_empty() {
            return Ok(());
        }

        let row_count = self.buffer.len();
        let chunk_rows = self.rows_per_statement();
        let mut rows = std::mem::take(&mut self.buffer).into_iter().peekable();

        let mut tx = self.pool.begin().await?;
        while rows.peek().is_some() {
            let chunk: Vec<Vec<SqlValue>> = rows.by_ref().take(chunk_rows).collect();
            let sql = self.insert_sql(chunk.len());
            let mut stmt = query::<DB>(&sql);
            for value in chunk.into_iter().flatten() {
                stmt = match value {
                    SqlValue::Int(v) => stmt.bind(v),
                    SqlValue::Text(v) => stmt.bind(v),
                };
            }
            stmt.execute(&mut *tx).await?;
        }
        tx.commit().await?;

        self.rows_written += row_count;
        self.batches += 1;
        tracing::debug!(
            table = self.table.name(),
            rows = row_count,
            total_rows = self.rows_written,
            "Flushed bulk insert batch"
        );
        Ok(())
    }
}

macro_rules! impl_batch_writer {
    ($db:ty) => {
        #[async_trait]
        impl BatchWriter for SqlBatchWriter<$db> {
            async fn write(&mut self, row: Vec<SqlValue>) -> Result<(), IngestError> {
                self.push(row)?;
                if self.is_full() {
                    self.flush().await?;
                }
                Ok(())
            }

            async fn close(self: Box<Self>) -> Result<BatchWriteResult, IngestError> {
                let mut writer = self;
                writer.flush().await?;
                Ok(BatchWriteResult {
                    rows: writer.rows_written,
                    batches: writer.batches,
                })
            }
        }
    };
}

impl_batch_writer!(Sqlite);
impl_batch_writer!(Postgres);
