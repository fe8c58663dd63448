//! Database backend abstraction for the catalog.
//!
//! This module provides a generic database backend that works with any sqlx-compatible
//! database (currently Postgres and SQLite). It abstracts over database-specific differences
//! like parameter binding syntax while providing a unified API for the dataset, header,
//! record, cell and operation tables.
//!
//! # Architecture
//!
//! The [`CatalogBackend`] struct is parameterized by a database type that implements
//! [`CatalogDatabase`]. This trait extends sqlx's `Database` trait with additional
//! functionality needed for cross-database compatibility.
//!
//! # Example
//!
//! ```ignore
//! use widedb::catalog::backend::CatalogBackend;
//! use sqlx::SqlitePool;
//!
//! let pool = SqlitePool::connect("sqlite::memory:").await?;
//! let backend = CatalogBackend::new(pool);
//! let datasets = backend.list_datasets(100).await?;
//! ```

use crate::catalog::bulk_writer::SqlBatchWriter;
use crate::catalog::manager::{
    BulkTable, CellValue, DatasetInfo, HeaderInfo, OperationInfo, ValueType,
    COLUMN_INDEX_INCREMENT,
};
use crate::operation::OperationStatus;
use anyhow::Result;
use chrono::Utc;
use sqlx::{
    query, query_as, query_scalar, ColumnIndex, Database, Decode, Encode, Executor, FromRow,
    IntoArguments, Pool, Postgres, Sqlite, Type,
};
use std::borrow::Cow;

/// Extension trait for sqlx databases that provides catalog-specific functionality.
///
/// This trait handles differences in SQL syntax between database backends,
/// particularly parameter binding syntax (e.g., `$1` for Postgres vs `?` for SQLite).
pub trait CatalogDatabase: Database {
    /// Returns the parameter placeholder for the given 1-based index.
    ///
    /// - Postgres uses `$1`, `$2`, etc.
    /// - SQLite uses `?` for all parameters (index is ignored).
    fn bind_param(index: usize) -> Cow<'static, str>;

    /// Most bind parameters the driver accepts in one statement.
    const MAX_BIND_PARAMS: usize;
}

impl CatalogDatabase for Postgres {
    // Bind messages carry the parameter count in 16 bits.
    const MAX_BIND_PARAMS: usize = 65_535;

    fn bind_param(index: usize) -> Cow<'static, str> {
        Cow::Owned(format!("${}", index))
    }
}

impl CatalogDatabase for Sqlite {
    // SQLITE_MAX_VARIABLE_NUMBER for SQLite 3.32 and later.
    const MAX_BIND_PARAMS: usize = 32_766;

    fn bind_param(_: usize) -> Cow<'static, str> {
        Cow::Borrowed("?")
    }
}

/// Returns true when a database error is a unique-constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().map(|c| c.to_string()).as_deref(),
            // Postgres: 23505 = unique_violation
            // SQLite: 2067 = SQLITE_CONSTRAINT_UNIQUE, 1555 = SQLITE_CONSTRAINT_PRIMARYKEY
            Some("23505") | Some("2067") | Some("1555")
        ),
        _ => false,
    }
}

fn now_timestamp() -> String {
    Utc::now().to_rfc3339()
}

const DATASET_COLUMNS: &str =
    "id, display_name, headers_set, num_records, min_record_id, max_record_id, created_at";

const OPERATION_COLUMNS: &str =
    "id, dataset_id, status, error_message, created_at, updated_at";

/// Generic database backend for catalog operations.
///
/// Wraps a sqlx connection pool. Works with any database that implements
/// [`CatalogDatabase`].
pub struct CatalogBackend<DB: CatalogDatabase> {
    pool: Pool<DB>,
}

impl<DB: CatalogDatabase> CatalogBackend<DB> {
    /// Creates a new backend with the given connection pool.
    pub fn new(pool: Pool<DB>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the underlying connection pool.
    pub fn pool(&self) -> &Pool<DB> {
        &self.pool
    }

    /// Opens a bulk writer for one of the bulk-loadable tables.
    pub fn batch_writer(&self, table: BulkTable, batch_size: usize) -> SqlBatchWriter<DB> {
        SqlBatchWriter::new(self.pool.clone(), table, batch_size)
    }
}

impl<DB> CatalogBackend<DB>
where
    DB: CatalogDatabase,
    DatasetInfo: for<'r> FromRow<'r, DB::Row>,
    HeaderInfo: for<'r> FromRow<'r, DB::Row>,
    OperationInfo: for<'r> FromRow<'r, DB::Row>,
    CellValue: for<'r> FromRow<'r, DB::Row>,
    for<'q> &'q str: Encode<'q, DB> + Type<DB>,
    for<'q> String: Encode<'q, DB> + Type<DB>,
    for<'q> Option<&'q str>: Encode<'q, DB> + Type<DB>,
    for<'q> bool: Encode<'q, DB> + Type<DB>,
    for<'q> i64: Encode<'q, DB> + Type<DB>,
    for<'r> i64: Decode<'r, DB>,
    for<'q> <DB as Database>::Arguments<'q>: IntoArguments<'q, DB> + Send,
    for<'c> &'c Pool<DB>: Executor<'c, Database = DB>,
    for<'c> &'c mut <DB as Database>::Connection: Executor<'c, Database = DB>,
    usize: ColumnIndex<DB::Row>,
{
    #[tracing::instrument(
        name = "catalog_create_dataset",
        skip(self),
        fields(widedb.dataset_id = tracing::field::Empty)
    )]
    pub async fn create_dataset(&self, display_name: &str) -> Result<DatasetInfo> {
        let mut tx = self.pool.begin().await?;

        let insert_sql = format!(
            "INSERT INTO datasets (display_name, headers_set, num_records, created_at) \
             VALUES ({}, {}, 0, {}) RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
        );
        let id: i64 = query_scalar::<DB, i64>(&insert_sql)
            .bind(display_name)
            .bind(false)
            .bind(now_timestamp())
            .fetch_one(&mut *tx)
            .await?;

        if display_name.is_empty() {
            let rename_sql = format!(
                "UPDATE datasets SET display_name = {} WHERE id = {}",
                DB::bind_param(1),
                DB::bind_param(2),
            );
            query(&rename_sql)
                .bind(format!("untitled-{}", id))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        let select_sql = format!(
            "SELECT {} FROM datasets WHERE id = {}",
            DATASET_COLUMNS,
            DB::bind_param(1)
        );
        let dataset = query_as::<DB, DatasetInfo>(&select_sql)
            .bind(id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::Span::current().record("widedb.dataset_id", id);
        Ok(dataset)
    }

    pub async fn get_dataset(&self, id: i64) -> Result<Option<DatasetInfo>> {
        let sql = format!(
            "SELECT {} FROM datasets WHERE id = {}",
            DATASET_COLUMNS,
            DB::bind_param(1)
        );

        query_as::<DB, DatasetInfo>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn list_datasets(&self, limit: i64) -> Result<Vec<DatasetInfo>> {
        let limit = if limit <= 0 { 100 } else { limit };
        let sql = format!(
            "SELECT {} FROM datasets ORDER BY id LIMIT {}",
            DATASET_COLUMNS,
            DB::bind_param(1)
        );

        query_as::<DB, DatasetInfo>(&sql)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn count_datasets(&self) -> Result<i64> {
        query_scalar::<DB, i64>("SELECT COUNT(*) FROM datasets")
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn set_headers_set(&self, dataset_id: i64, headers_set: bool) -> Result<()> {
        let sql = format!(
            "UPDATE datasets SET headers_set = {} WHERE id = {}",
            DB::bind_param(1),
            DB::bind_param(2),
        );

        query(&sql)
            .bind(headers_set)
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(
        name = "catalog_update_num_records",
        skip(self),
        fields(widedb.dataset_id = %dataset_id)
    )]
    pub async fn update_num_records(&self, dataset_id: i64) -> Result<()> {
        let sql = format!(
            "UPDATE datasets SET \
             num_records = (SELECT COUNT(*) FROM records_processed WHERE dataset_id = {}), \
             min_record_id = (SELECT MIN(record_id) FROM records_processed WHERE dataset_id = {}), \
             max_record_id = (SELECT MAX(record_id) FROM records_processed WHERE dataset_id = {}) \
             WHERE id = {}",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
        );

        query(&sql)
            .bind(dataset_id)
            .bind(dataset_id)
            .bind(dataset_id)
            .bind(dataset_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn create_header(
        &self,
        dataset_id: i64,
        display_name: &str,
        column_index: i64,
    ) -> Result<HeaderInfo> {
        let sql = format!(
            "INSERT INTO headers (dataset_id, display_name, column_position, value_type) \
             VALUES ({}, {}, {}, {}) RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
        );

        let id = query_scalar::<DB, i64>(&sql)
            .bind(dataset_id)
            .bind(display_name)
            .bind(column_index * COLUMN_INDEX_INCREMENT)
            .bind(ValueType::Raw.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(HeaderInfo {
            id,
            dataset_id,
            display_name: display_name.to_string(),
            column_index,
            value_type: ValueType::Raw.as_str().to_string(),
        })
    }

    pub async fn list_headers(&self, dataset_id: i64) -> Result<Vec<HeaderInfo>> {
        let sql = format!(
            "SELECT id, dataset_id, display_name, column_position / {} AS column_index, value_type \
             FROM headers WHERE dataset_id = {} ORDER BY column_position, id",
            COLUMN_INDEX_INCREMENT,
            DB::bind_param(1)
        );

        query_as::<DB, HeaderInfo>(&sql)
            .bind(dataset_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn set_column_index(&self, header_id: i64, column_index: i64) -> Result<()> {
        let sql = format!(
            "UPDATE headers SET column_position = {} WHERE id = {}",
            DB::bind_param(1),
            DB::bind_param(2),
        );

        query(&sql)
            .bind(column_index * COLUMN_INDEX_INCREMENT)
            .bind(header_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub async fn list_record_ids(
        &self,
        operation_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<i64>> {
        let sql = format!(
            "SELECT id FROM records WHERE operation_id = {} AND id > {} ORDER BY id LIMIT {}",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
        );

        query_scalar::<DB, i64>(&sql)
            .bind(operation_id)
            .bind(after_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn max_record_id(&self, dataset_id: i64) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX(id) FROM records WHERE dataset_id = {}",
            DB::bind_param(1)
        );

        query_scalar::<DB, Option<i64>>(&sql)
            .bind(dataset_id)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn page_upper_bound(
        &self,
        dataset_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Option<i64>> {
        let sql = format!(
            "SELECT MAX(page.id) FROM ( \
                 SELECT id FROM records WHERE dataset_id = {} AND id > {} ORDER BY id LIMIT {} \
             ) AS page",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
        );

        query_scalar::<DB, Option<i64>>(&sql)
            .bind(dataset_id)
            .bind(after_id)
            .bind(limit)
            .fetch_one(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn list_cells(
        &self,
        header_ids: &[i64],
        after_id: i64,
        upper_bound: i64,
    ) -> Result<Vec<CellValue>> {
        if header_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders: Vec<String> = (1..=header_ids.len())
            .map(|i| DB::bind_param(i).into_owned())
            .collect();
        let next = header_ids.len() + 1;
        let sql = format!(
            "SELECT record_id, header_id, raw_value FROM cells \
             WHERE header_id IN ({}) AND record_id > {} AND record_id <= {} \
             ORDER BY header_id, record_id",
            placeholders.join(", "),
            DB::bind_param(next),
            DB::bind_param(next + 1),
        );

        let mut stmt = query_as::<DB, CellValue>(&sql);
        for header_id in header_ids {
            stmt = stmt.bind(*header_id);
        }
        stmt.bind(after_id)
            .bind(upper_bound)
            .fetch_all(&self.pool)
            .await
            .map_err(Into::into)
    }

    #[tracing::instrument(
        name = "catalog_create_operation",
        skip(self),
        fields(widedb.dataset_id = %dataset_id)
    )]
    pub async fn create_operation(&self, dataset_id: i64) -> Result<Option<OperationInfo>> {
        let now = now_timestamp();
        let sql = format!(
            "INSERT INTO operations (dataset_id, status, error_message, created_at, updated_at) \
             VALUES ({}, {}, NULL, {}, {}) RETURNING id",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
        );

        let result = query_scalar::<DB, i64>(&sql)
            .bind(dataset_id)
            .bind(OperationStatus::NotStarted.as_str())
            .bind(now.as_str())
            .bind(now.as_str())
            .fetch_one(&self.pool)
            .await;

        match result {
            Ok(id) => Ok(Some(OperationInfo {
                id,
                dataset_id,
                status: OperationStatus::NotStarted.as_str().to_string(),
                error_message: None,
                created_at: now.clone(),
                updated_at: now,
            })),
            // The partial unique index on in-flight operations rejected the insert.
            Err(e) if is_unique_violation(&e) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_operation(&self, id: i64) -> Result<Option<OperationInfo>> {
        let sql = format!(
            "SELECT {} FROM operations WHERE id = {}",
            OPERATION_COLUMNS,
            DB::bind_param(1)
        );

        query_as::<DB, OperationInfo>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(Into::into)
    }

    pub async fn update_operation_status(
        &self,
        id: i64,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        let sql = format!(
            "UPDATE operations SET status = {}, error_message = {}, updated_at = {} WHERE id = {}",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
        );

        query(&sql)
            .bind(status)
            .bind(error_message)
            .bind(now_timestamp())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    #[tracing::instrument(name = "catalog_fail_interrupted_operations", skip(self, message))]
    pub async fn fail_interrupted_operations(&self, message: &str) -> Result<u64> {
        let count_sql = format!(
            "SELECT COUNT(*) FROM operations WHERE status IN ({}, {})",
            DB::bind_param(1),
            DB::bind_param(2),
        );
        let interrupted = query_scalar::<DB, i64>(&count_sql)
            .bind(OperationStatus::NotStarted.as_str())
            .bind(OperationStatus::Running.as_str())
            .fetch_one(&self.pool)
            .await?;
        if interrupted == 0 {
            return Ok(0);
        }

        let sql = format!(
            "UPDATE operations SET status = {}, error_message = {}, updated_at = {} \
             WHERE status IN ({}, {})",
            DB::bind_param(1),
            DB::bind_param(2),
            DB::bind_param(3),
            DB::bind_param(4),
            DB::bind_param(5),
        );

        query(&sql)
            .bind(OperationStatus::Failed.as_str())
            .bind(message)
            .bind(now_timestamp())
            .bind(OperationStatus::NotStarted.as_str())
            .bind(OperationStatus::Running.as_str())
            .execute(&self.pool)
            .await?;

        Ok(interrupted as u64)
    }
}
