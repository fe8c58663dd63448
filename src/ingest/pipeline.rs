use super::{CsvSource, IngestError, SqlValue};
use crate::catalog::{BulkTable, CatalogManager, HeaderInfo, ValueType};
use crate::operation::OperationTracker;
use anyhow::anyhow;
use csv::StringRecord;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, Instrument};

/// Default number of buffered rows per bulk insert.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Largest accepted batch size. Bigger batches are split into several
/// statements anyway, so this only bounds the rows held in memory.
pub const MAX_BATCH_SIZE: usize = 100_000;

/// Rows parsed ahead of the loader before the reader blocks.
const ROW_CHANNEL_CAPACITY: usize = 1024;

/// Tuning knobs for uploads.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Rows buffered per bulk insert transaction.
    pub batch_size: usize,
    /// How often the record counter refreshes dataset totals.
    pub counter_refresh: Duration,
    /// How often the record counter checks whether the upload finished.
    pub completion_poll: Duration,
    /// Hard ceiling on the record counter's lifetime.
    pub counter_timeout: Duration,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            counter_refresh: Duration::from_secs(10),
            completion_poll: Duration::from_secs(60),
            counter_timeout: Duration::from_secs(24 * 60 * 60),
        }
    }
}

impl IngestOptions {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            anyhow::bail!(
                "batch size must be between 1 and {}, got {}",
                MAX_BATCH_SIZE,
                self.batch_size
            );
        }
        if self.counter_refresh.is_zero() || self.completion_poll.is_zero() {
            anyhow::bail!("Record counter intervals must be greater than zero");
        }
        if self.counter_timeout.is_zero() {
            anyhow::bail!("Record counter timeout must be greater than zero");
        }
        Ok(())
    }
}

/// Counts reported by a finished upload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub headers: usize,
    pub records: usize,
    pub cells: usize,
}

/// Loads one staged CSV into a dataset.
pub struct IngestPipeline {
    catalog: Arc<dyn CatalogManager>,
    options: IngestOptions,
}

impl IngestPipeline {
    pub fn new(catalog: Arc<dyn CatalogManager>, options: IngestOptions) -> Self {
        Self { catalog, options }
    }

    /// Run the upload to completion.
    ///
    /// Never returns an error: a failure at any step is logged and recorded
    /// on the operation, and whatever was already written stays in place.
    pub async fn run(
        &self,
        dataset_id: i64,
        tracker: Arc<OperationTracker>,
        source: Arc<dyn CsvSource>,
    ) {
        let span = tracing::info_span!(
            "ingest_operation",
            widedb.operation_id = tracker.id(),
            widedb.dataset_id = dataset_id,
        );

        async {
            match self.ingest(dataset_id, &tracker, source).await {
                Ok(summary) => info!(
                    headers = summary.headers,
                    records = summary.records,
                    cells = summary.cells,
                    "Upload finished"
                ),
                Err(e) => {
                    error!("Upload failed: {}", e);
                    if let Err(mark_err) = tracker.mark_failed(&e.to_string()).await {
                        error!("Failed to record upload failure: {}", mark_err);
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn ingest(
        &self,
        dataset_id: i64,
        tracker: &OperationTracker,
        source: Arc<dyn CsvSource>,
    ) -> Result<IngestSummary, IngestError> {
        tracker.mark_running().await?;

        let (headers, header_rows) = self.resolve_headers(dataset_id, &source).await?;
        info!(headers = headers.len(), "Resolved headers");

        let records = self
            .create_records(dataset_id, tracker.id(), &source, header_rows)
            .await?;
        info!(records, "Created records");

        let (cells, headers) = self
            .create_cells(dataset_id, tracker.id(), &source, header_rows, headers)
            .await?;
        info!(cells, "Created cells");

        self.catalog.update_num_records(dataset_id).await?;
        tracker.mark_success().await?;

        Ok(IngestSummary {
            headers,
            records,
            cells,
        })
    }

    /// Returns the dataset's headers and how many leading rows of the file
    /// were consumed as header names (0 or 1).
    async fn resolve_headers(
        &self,
        dataset_id: i64,
        source: &Arc<dyn CsvSource>,
    ) -> Result<(Vec<HeaderInfo>, usize), IngestError> {
        let dataset = self
            .catalog
            .get_dataset(dataset_id)
            .await?
            .ok_or_else(|| anyhow!("dataset {} not found", dataset_id))?;

        let headers = self.catalog.list_headers(dataset_id).await?;
        if !headers.is_empty() {
            if !dataset.headers_set {
                self.catalog.set_headers_set(dataset_id, true).await?;
            }
            return Ok((headers, 0));
        }

        let mut rows = read_rows(source.clone(), 0);
        let names = match rows.recv().await {
            Some(row) => row?,
            // Empty file: no columns, nothing to latch.
            None => return Ok((headers, 0)),
        };
        drop(rows);

        let mut writer = self
            .catalog
            .open_batch_writer(BulkTable::Headers, self.options.batch_size)
            .await?;
        for name in names.iter() {
            writer
                .write(vec![
                    SqlValue::Int(dataset_id),
                    SqlValue::from(name),
                    SqlValue::from(ValueType::Raw.as_str()),
                ])
                .await?;
        }
        writer.close().await?;

        self.catalog.set_headers_set(dataset_id, true).await?;

        let created = self.catalog.list_headers(dataset_id).await?;
        for (index, header) in created.iter().enumerate() {
            self.catalog
                .set_column_index(header.id, index as i64)
                .await?;
        }

        let headers = self.catalog.list_headers(dataset_id).await?;
        Ok((headers, 1))
    }

    async fn create_records(
        &self,
        dataset_id: i64,
        operation_id: i64,
        source: &Arc<dyn CsvSource>,
        skip: usize,
    ) -> Result<usize, IngestError> {
        let mut writer = self
            .catalog
            .open_batch_writer(BulkTable::Records, self.options.batch_size)
            .await?;

        let mut rows = read_rows(source.clone(), skip);
        while let Some(row) = rows.recv().await {
            row?;
            writer
                .write(vec![SqlValue::Int(operation_id), SqlValue::Int(dataset_id)])
                .await?;
        }

        Ok(writer.close().await?.rows)
    }

    /// Pair each data row with the next record of this operation by id and
    /// write one cell per value. Returns the number of cells and the final
    /// header count.
    async fn create_cells(
        &self,
        dataset_id: i64,
        operation_id: i64,
        source: &Arc<dyn CsvSource>,
        skip: usize,
        mut headers: Vec<HeaderInfo>,
    ) -> Result<(usize, usize), IngestError> {
        let mut cells = self
            .catalog
            .open_batch_writer(BulkTable::Cells, self.options.batch_size)
            .await?;
        let mut processed = self
            .catalog
            .open_batch_writer(BulkTable::RecordsProcessed, self.options.batch_size)
            .await?;

        let mut record_ids = RecordIdPager::new(
            self.catalog.clone(),
            operation_id,
            self.options.batch_size as i64,
        );
        let mut rows = read_rows(source.clone(), skip);
        let mut row_number = 0;

        while let Some(row) = rows.recv().await {
            let row = row?;
            row_number += 1;
            let record_id = record_ids
                .next()
                .await?
                .ok_or(IngestError::RowRecordMismatch { row: row_number })?;

            for (column, value) in row.iter().enumerate() {
                if column >= headers.len() {
                    let header = self
                        .catalog
                        .create_header(
                            dataset_id,
                            &format!("column-{}", column + 1),
                            column as i64,
                        )
                        .await?;
                    info!(
                        header_id = header.id,
                        column_index = header.column_index,
                        "Extended dataset with new header"
                    );
                    headers.push(header);
                }

                cells
                    .write(vec![
                        SqlValue::Int(record_id),
                        SqlValue::Int(headers[column].id),
                        SqlValue::Int(operation_id),
                        SqlValue::from(value),
                    ])
                    .await?;
            }

            processed
                .write(vec![SqlValue::Int(record_id), SqlValue::Int(dataset_id)])
                .await?;
        }

        if record_ids.next().await?.is_some() {
            return Err(IngestError::RowRecordMismatch {
                row: row_number + 1,
            });
        }

        let written = cells.close().await?;
        processed.close().await?;
        Ok((written.rows, headers.len()))
    }
}

/// Walks the ids of one operation's records in ascending order, one keyset
/// page at a time.
struct RecordIdPager {
    catalog: Arc<dyn CatalogManager>,
    operation_id: i64,
    page_size: i64,
    after_id: i64,
    buffered: VecDeque<i64>,
    exhausted: bool,
}

impl RecordIdPager {
    fn new(catalog: Arc<dyn CatalogManager>, operation_id: i64, page_size: i64) -> Self {
        Self {
            catalog,
            operation_id,
            page_size: page_size.max(1),
            after_id: 0,
            buffered: VecDeque::new(),
            exhausted: false,
        }
    }

    async fn next(&mut self) -> Result<Option<i64>, IngestError> {
        if self.buffered.is_empty() && !self.exhausted {
            let page = self
                .catalog
                .list_record_ids(self.operation_id, self.after_id, self.page_size)
                .await?;
            if (page.len() as i64) < self.page_size {
                self.exhausted = true;
            }
            if let Some(last) = page.last() {
                self.after_id = *last;
            }
            self.buffered.extend(page);
        }
        Ok(self.buffered.pop_front())
    }
}

/// Parse `source` on the blocking pool and stream its rows, skipping the
/// first `skip`. A parse error is sent once and ends the stream. Dropping
/// the receiver stops the reader.
fn read_rows(
    source: Arc<dyn CsvSource>,
    skip: usize,
) -> mpsc::Receiver<Result<StringRecord, IngestError>> {
    let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);

    tokio::task::spawn_blocking(move || {
        let reader = match source.open() {
            Ok(reader) => reader,
            Err(e) => {
                let _ = tx.blocking_send(Err(e.into()));
                return;
            }
        };

        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        for row in csv_reader.records().skip(skip) {
            let failed = row.is_err();
            if tx.blocking_send(row.map_err(IngestError::from)).is_err() || failed {
                return;
            }
        }
    });

    rx
}
