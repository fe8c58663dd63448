use crate::catalog::{
    CatalogManager, DatasetInfo, HeaderInfo, PostgresCatalogManager, SqliteCatalogManager,
};
use crate::config::AppConfig;
use crate::datasets::{DataPage, DataReader, DataRequest, DatasetError};
use crate::ingest::{run_record_counter, CsvSource, IngestOptions, IngestPipeline, StagedFile};
use crate::operation::{Operation, OperationTracker};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Message stored on operations found unfinished when the engine starts.
const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Largest page `list_datasets` will return.
pub const MAX_DATASETS_LIMIT: i64 = 1000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedDataset {
    pub dataset: DatasetInfo,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetList {
    pub datasets: Vec<DatasetInfo>,
    pub total_count: i64,
}

/// Handle returned when an upload is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHandle {
    pub operation_id: i64,
    pub url: String,
}

pub fn dataset_url(dataset_id: i64) -> String {
    format!("/v1/datasets/{}", dataset_id)
}

pub fn operation_url(operation_id: i64) -> String {
    format!("/v1/operations/{}", operation_id)
}

/// Owns the catalog and every upload running against it.
pub struct WideDbEngine {
    catalog: Arc<dyn CatalogManager>,
    pipeline: Arc<IngestPipeline>,
    reader: DataReader,
    ingest_options: IngestOptions,
    staging_dir: PathBuf,
    shutdown_token: CancellationToken,
    tasks: TaskTracker,
}

impl WideDbEngine {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create an engine with default settings at the given base directory.
    ///
    /// Uses a SQLite catalog at {base_dir}/catalog.db and stages uploads in {base_dir}/staging.
    pub async fn defaults(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Self::builder().base_dir(base_dir).build().await
    }

    /// Create a builder for more control over engine configuration.
    pub fn builder() -> WideDbEngineBuilder {
        WideDbEngineBuilder::new()
    }

    /// Create a new engine from application configuration.
    pub async fn from_config(config: &AppConfig) -> Result<Self> {
        let mut builder = WideDbEngine::builder().ingest_options(config.ingest.to_options());

        if let Some(base) = &config.paths.base_dir {
            builder = builder.base_dir(PathBuf::from(base));
        }
        if let Some(staging) = &config.paths.staging_dir {
            builder = builder.staging_dir(PathBuf::from(staging));
        }

        // Only create an explicit catalog for non-sqlite backends
        if config.catalog.catalog_type == "postgres" {
            let catalog = PostgresCatalogManager::new(&config.postgres_url()?).await?;
            builder = builder.catalog(Arc::new(catalog));
        }

        builder.build().await
    }

    pub fn catalog(&self) -> &Arc<dyn CatalogManager> {
        &self.catalog
    }

    pub fn staging_dir(&self) -> &Path {
        &self.staging_dir
    }

    // =========================================================================
    // Datasets
    // =========================================================================

    /// Create a dataset. A missing or empty name becomes `untitled-<id>`.
    #[tracing::instrument(name = "create_dataset", skip(self))]
    pub async fn create_dataset(
        &self,
        display_name: Option<&str>,
    ) -> Result<CreatedDataset, DatasetError> {
        let dataset = self
            .catalog
            .create_dataset(display_name.unwrap_or_default())
            .await?;
        info!(
            widedb.dataset_id = dataset.id,
            display_name = %dataset.display_name,
            "Created dataset"
        );

        Ok(CreatedDataset {
            url: dataset_url(dataset.id),
            dataset,
        })
    }

    pub async fn get_dataset(&self, dataset_id: i64) -> Result<DatasetInfo, DatasetError> {
        self.catalog
            .get_dataset(dataset_id)
            .await?
            .ok_or(DatasetError::NotFound(dataset_id))
    }

    /// List datasets in id order. `max_results <= 0` returns the default page.
    pub async fn list_datasets(&self, max_results: i64) -> Result<DatasetList, DatasetError> {
        let total_count = self.catalog.count_datasets().await?;
        let datasets = self
            .catalog
            .list_datasets(max_results.min(MAX_DATASETS_LIMIT))
            .await?;

        Ok(DatasetList {
            datasets,
            total_count,
        })
    }

    pub async fn get_headers(&self, dataset_id: i64) -> Result<Vec<HeaderInfo>, DatasetError> {
        self.get_dataset(dataset_id).await?;
        Ok(self.catalog.list_headers(dataset_id).await?)
    }

    pub async fn get_data(
        &self,
        dataset_id: i64,
        request: &DataRequest,
    ) -> Result<DataPage, DatasetError> {
        self.reader.read_page(dataset_id, request).await
    }

    // =========================================================================
    // Uploads
    // =========================================================================

    /// Write an upload body to the staging directory so it can be re-read
    /// by each ingestion step.
    pub async fn stage_upload(
        &self,
        data: impl AsRef<[u8]> + Send + 'static,
    ) -> Result<StagedFile, DatasetError> {
        StagedFile::stage(data, self.staging_dir.clone())
            .await
            .map_err(DatasetError::Staging)
    }

    /// Start loading `source` into a dataset and return immediately.
    ///
    /// Only one upload per dataset may be in flight; a second one is refused
    /// with [`DatasetError::UploadInProgress`] until the first finishes.
    #[tracing::instrument(
        name = "upload_dataset",
        skip(self, source),
        fields(
            widedb.dataset_id = dataset_id,
            widedb.operation_id = tracing::field::Empty,
        )
    )]
    pub async fn upload_dataset(
        &self,
        dataset_id: i64,
        source: Arc<dyn CsvSource>,
    ) -> Result<UploadHandle, DatasetError> {
        self.get_dataset(dataset_id).await?;

        let info = self
            .catalog
            .create_operation(dataset_id)
            .await?
            .ok_or(DatasetError::UploadInProgress(dataset_id))?;
        let operation = Operation::try_from(info).map_err(|e| DatasetError::Catalog(e.into()))?;
        let operation_id = operation.id;
        tracing::Span::current().record("widedb.operation_id", operation_id);

        let tracker = Arc::new(OperationTracker::new(self.catalog.clone(), operation));

        self.tasks.spawn(run_record_counter(
            self.catalog.clone(),
            tracker.clone(),
            dataset_id,
            self.ingest_options.clone(),
            self.shutdown_token.child_token(),
        ));

        let pipeline = self.pipeline.clone();
        self.tasks.spawn(async move {
            pipeline.run(dataset_id, tracker, source).await;
        });

        info!("Upload accepted");
        Ok(UploadHandle {
            operation_id,
            url: operation_url(operation_id),
        })
    }

    pub async fn get_operation(&self, operation_id: i64) -> Result<Operation, DatasetError> {
        let info = self
            .catalog
            .get_operation(operation_id)
            .await?
            .ok_or(DatasetError::OperationNotFound(operation_id))?;
        Operation::try_from(info).map_err(|e| DatasetError::Catalog(e.into()))
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop record counters and wait for in-flight uploads to finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown_token.cancel();
        self.tasks.close();
        if !self.tasks.is_empty() {
            info!(tasks = self.tasks.len(), "Waiting for uploads to finish");
        }
        self.tasks.wait().await;
        self.catalog.close().await
    }
}

impl Drop for WideDbEngine {
    fn drop(&mut self) {
        // Stop record counters; uploads themselves run to completion
        self.shutdown_token.cancel();
    }
}

/// Builder for WideDbEngine
///
/// The builder is responsible for:
/// - Resolving the base directory (defaults to ~/.widedb)
/// - Creating the default SQLite catalog when none is provided
/// - Running migrations and failing operations left over from a previous run
///
/// # Example
///
/// ```no_run
/// # async fn example() -> anyhow::Result<()> {
/// use widedb::WideDbEngine;
///
/// // Minimal: uses ~/.widedb with a SQLite catalog
/// let engine = WideDbEngine::builder().build().await?;
/// engine.shutdown().await?;
///
/// // Custom base dir with defaults
/// let engine = WideDbEngine::builder()
///     .base_dir("/tmp/widedb")
///     .build()
///     .await?;
/// # engine.shutdown().await?;
/// # Ok(())
/// # }
/// ```
pub struct WideDbEngineBuilder {
    base_dir: Option<PathBuf>,
    staging_dir: Option<PathBuf>,
    catalog: Option<Arc<dyn CatalogManager>>,
    ingest_options: IngestOptions,
}

impl Default for WideDbEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl WideDbEngineBuilder {
    pub fn new() -> Self {
        Self {
            base_dir: None,
            staging_dir: None,
            catalog: None,
            ingest_options: IngestOptions::default(),
        }
    }

    /// Set the base directory for all WideDB data.
    /// Defaults to ~/.widedb if not set.
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Set the directory uploads are staged in.
    /// Defaults to {base_dir}/staging if not set.
    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// Set a custom catalog manager.
    /// If not set, creates a SQLite catalog at {base_dir}/catalog.db
    pub fn catalog(mut self, catalog: Arc<dyn CatalogManager>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Set batch size and record counter timing for uploads.
    pub fn ingest_options(mut self, options: IngestOptions) -> Self {
        self.ingest_options = options;
        self
    }

    fn resolve_base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| {
            let home = std::env::var("HOME")
                .or_else(|_| std::env::var("USERPROFILE"))
                .unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".widedb")
        })
    }

    pub async fn build(self) -> Result<WideDbEngine> {
        self.ingest_options.validate()?;

        let base_dir = self.resolve_base_dir();
        let staging_dir = self
            .staging_dir
            .clone()
            .unwrap_or_else(|| base_dir.join("staging"));

        std::fs::create_dir_all(&base_dir)?;
        std::fs::create_dir_all(&staging_dir)?;

        let catalog: Arc<dyn CatalogManager> = match self.catalog {
            Some(c) => c,
            None => {
                let catalog_path = base_dir.join("catalog.db");
                Arc::new(
                    SqliteCatalogManager::new(
                        catalog_path
                            .to_str()
                            .ok_or_else(|| anyhow::anyhow!("Invalid catalog path"))?,
                    )
                    .await?,
                )
            }
        };

        catalog.run_migrations().await?;

        // Nothing resumes an upload from a previous process; make it visibly failed
        // so its dataset accepts new uploads.
        let interrupted = catalog
            .fail_interrupted_operations(INTERRUPTED_MESSAGE)
            .await?;
        if interrupted > 0 {
            warn!(count = interrupted, "Marked interrupted uploads as failed");
        }

        Ok(WideDbEngine {
            pipeline: Arc::new(IngestPipeline::new(
                catalog.clone(),
                self.ingest_options.clone(),
            )),
            reader: DataReader::new(catalog.clone()),
            catalog,
            ingest_options: self.ingest_options,
            staging_dir,
            shutdown_token: CancellationToken::new(),
            tasks: TaskTracker::new(),
        })
    }
}
