use crate::catalog::backend::CatalogBackend;
use crate::catalog::manager::{
    BulkTable, CatalogManager, CellValue, DatasetInfo, HeaderInfo, OperationInfo,
};
use crate::catalog::migrations::{run_migrations, CatalogMigrations};
use crate::ingest::BatchWriter;
use anyhow::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool};
use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

pub struct SqliteCatalogManager {
    backend: CatalogBackend<Sqlite>,
    catalog_path: String,
}

impl Debug for SqliteCatalogManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteCatalogManager")
            .field("catalog_path", &self.catalog_path)
            .finish()
    }
}

struct SqliteMigrationBackend;

impl SqliteCatalogManager {
    pub async fn new(db_path: &str) -> Result<Self> {
        // Ingestion writes from a loader and a record counter at the same
        // time, so writers queue on the busy timeout instead of failing.
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let backend = CatalogBackend::new(pool);

        Ok(Self {
            backend,
            catalog_path: db_path.to_string(),
        })
    }
}

#[async_trait]
impl CatalogManager for SqliteCatalogManager {
    async fn close(&self) -> Result<()> {
        self.backend.pool().close().await;
        Ok(())
    }

    async fn run_migrations(&self) -> Result<()> {
        run_migrations::<SqliteMigrationBackend>(self.backend.pool()).await
    }

    async fn create_dataset(&self, display_name: &str) -> Result<DatasetInfo> {
        self.backend.create_dataset(display_name).await
    }

    async fn get_dataset(&self, id: i64) -> Result<Option<DatasetInfo>> {
        self.backend.get_dataset(id).await
    }

    async fn list_datasets(&self, limit: i64) -> Result<Vec<DatasetInfo>> {
        self.backend.list_datasets(limit).await
    }

    async fn count_datasets(&self) -> Result<i64> {
        self.backend.count_datasets().await
    }

    async fn set_headers_set(&self, dataset_id: i64, headers_set: bool) -> Result<()> {
        self.backend.set_headers_set(dataset_id, headers_set).await
    }

    async fn update_num_records(&self, dataset_id: i64) -> Result<()> {
        self.backend.update_num_records(dataset_id).await
    }

    async fn create_header(
        &self,
        dataset_id: i64,
        display_name: &str,
        column_index: i64,
    ) -> Result<HeaderInfo> {
        self.backend
            .create_header(dataset_id, display_name, column_index)
            .await
    }

    async fn list_headers(&self, dataset_id: i64) -> Result<Vec<HeaderInfo>> {
        self.backend.list_headers(dataset_id).await
    }

    async fn set_column_index(&self, header_id: i64, column_index: i64) -> Result<()> {
        self.backend.set_column_index(header_id, column_index).await
    }

    async fn list_record_ids(
        &self,
        operation_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Vec<i64>> {
        self.backend
            .list_record_ids(operation_id, after_id, limit)
            .await
    }

    async fn max_record_id(&self, dataset_id: i64) -> Result<Option<i64>> {
        self.backend.max_record_id(dataset_id).await
    }

    async fn page_upper_bound(
        &self,
        dataset_id: i64,
        after_id: i64,
        limit: i64,
    ) -> Result<Option<i64>> {
        self.backend
            .page_upper_bound(dataset_id, after_id, limit)
            .await
    }

    async fn list_cells(
        &self,
        header_ids: &[i64],
        after_id: i64,
        upper_bound: i64,
    ) -> Result<Vec<CellValue>> {
        self.backend
            .list_cells(header_ids, after_id, upper_bound)
            .await
    }

    async fn create_operation(&self, dataset_id: i64) -> Result<Option<OperationInfo>> {
        self.backend.create_operation(dataset_id).await
    }

    async fn get_operation(&self, id: i64) -> Result<Option<OperationInfo>> {
        self.backend.get_operation(id).await
    }

    async fn update_operation_status(
        &self,
        id: i64,
        status: &str,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.backend
            .update_operation_status(id, status, error_message)
            .await
    }

    async fn fail_interrupted_operations(&self, message: &str) -> Result<u64> {
        self.backend.fail_interrupted_operations(message).await
    }

    async fn open_batch_writer(
        &self,
        table: BulkTable,
        batch_size: usize,
    ) -> Result<Box<dyn BatchWriter>> {
        Ok(Box::new(self.backend.batch_writer(table, batch_size)))
    }
}

impl CatalogMigrations for SqliteMigrationBackend {
    type Pool = SqlitePool;

    fn ensure_migrations_table(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
                )
                "#,
            )
            .execute(pool)
            .await?;
            Ok(())
        }
        .boxed()
    }

    fn current_version(pool: &Self::Pool) -> BoxFuture<'_, Result<i64>> {
        async move {
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_migrations")
                .fetch_one(pool)
                .await
                .map_err(Into::into)
        }
        .boxed()
    }

    fn record_version(pool: &Self::Pool, version: i64) -> BoxFuture<'_, Result<()>> {
        async move {
            sqlx::query("INSERT INTO schema_migrations (version) VALUES (?)")
                .bind(version)
                .execute(pool)
                .await?;
            Ok(())
        }
        .boxed()
    }

    fn migrate_v1(pool: &Self::Pool) -> BoxFuture<'_, Result<()>> {
        async move {
            let statements = [
                r#"
                CREATE TABLE IF NOT EXISTS datasets (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    display_name TEXT NOT NULL,
                    headers_set BOOLEAN NOT NULL DEFAULT 0,
                    num_records INTEGER NOT NULL DEFAULT 0,
                    min_record_id INTEGER,
                    max_record_id INTEGER,
                    created_at TEXT NOT NULL
                )
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS headers (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    dataset_id INTEGER NOT NULL REFERENCES datasets(id),
                    display_name TEXT NOT NULL,
                    column_position INTEGER NOT NULL DEFAULT 0,
                    value_type TEXT NOT NULL DEFAULT 'RAW'
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_headers_dataset ON headers (dataset_id, column_position)",
                r#"
                CREATE TABLE IF NOT EXISTS operations (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    dataset_id INTEGER NOT NULL REFERENCES datasets(id),
                    status TEXT NOT NULL,
                    error_message TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                )
                "#,
                // At most one in-flight upload per dataset.
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_operations_active_upload
                ON operations (dataset_id)
                WHERE status IN ('NOT_STARTED', 'RUNNING')
                "#,
                r#"
                CREATE TABLE IF NOT EXISTS records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    operation_id INTEGER NOT NULL REFERENCES operations(id),
                    dataset_id INTEGER NOT NULL REFERENCES datasets(id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_records_dataset ON records (dataset_id, id)",
                "CREATE INDEX IF NOT EXISTS idx_records_operation ON records (operation_id, id)",
                r#"
                CREATE TABLE IF NOT EXISTS cells (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    record_id INTEGER NOT NULL REFERENCES records(id),
                    header_id INTEGER NOT NULL REFERENCES headers(id),
                    operation_id INTEGER NOT NULL REFERENCES operations(id),
                    raw_value TEXT NOT NULL
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_cells_header_record ON cells (header_id, record_id)",
                r#"
                CREATE TABLE IF NOT EXISTS records_processed (
                    record_id INTEGER PRIMARY KEY REFERENCES records(id),
                    dataset_id INTEGER NOT NULL REFERENCES datasets(id)
                )
                "#,
                "CREATE INDEX IF NOT EXISTS idx_records_processed_dataset ON records_processed (dataset_id, record_id)",
            ];

            for statement in statements {
                sqlx::query(statement).execute(pool).await?;
            }
            Ok(())
        }
        .boxed()
    }
}
