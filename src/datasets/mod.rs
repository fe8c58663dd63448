//! Dataset reads: error taxonomy and paginated column retrieval.

pub mod error;
pub mod pagination;

pub use error::DatasetError;
pub use pagination::{
    ColumnData, DataCursor, DataPage, DataReader, DataRequest, BEFORE_FIRST_RECORD,
    DEFAULT_MAX_RESULTS,
};
