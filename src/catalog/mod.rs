pub mod backend;
mod bulk_writer;
mod migrations;
mod postgres_manager;
mod sqlite_manager;

mod manager;

pub use bulk_writer::SqlBatchWriter;
pub use manager::{
    BulkTable, CatalogManager, CellValue, DatasetInfo, HeaderInfo, OperationInfo, ValueType,
    COLUMN_INDEX_INCREMENT,
};
pub use postgres_manager::PostgresCatalogManager;
pub use sqlite_manager::SqliteCatalogManager;
