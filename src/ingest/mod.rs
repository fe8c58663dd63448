//! CSV ingestion: staging uploads and loading them into the catalog.
//!
//! An upload runs as a background task that walks the staged file three
//! times: once to resolve headers, once to create a record per data row,
//! and once to create one cell per value. Record counts are
//! refreshed concurrently while the load is in progress.

mod batch_writer;
mod error;
mod pipeline;
mod record_counter;
mod source;

pub use batch_writer::{BatchWriteResult, BatchWriter, SqlValue};
pub use error::IngestError;
pub use pipeline::{
    IngestOptions, IngestPipeline, IngestSummary, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE,
};
pub use record_counter::run_record_counter;
pub use source::{CsvSource, InMemorySource, StagedFile};
