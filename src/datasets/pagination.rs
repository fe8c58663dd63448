//! Column-oriented pages over a dataset's cells.
//!
//! A page is defined by a range of record ids, not by a number of cells:
//! the reader finds the largest id among the next `max_results` records
//! after the cursor and returns every selected cell inside that range.
//! Cells come back ordered by `(header_id, record_id)`, so a single pass
//! over them yields one column per header without pivoting.

use super::DatasetError;
use crate::catalog::{CatalogManager, CellValue, HeaderInfo};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Rows per page when the caller does not ask for a positive number.
pub const DEFAULT_MAX_RESULTS: i64 = 100;

/// Cursor value that starts a traversal before the first record.
pub const BEFORE_FIRST_RECORD: i64 = -1;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRequest {
    /// Headers to include. Empty means every header of the dataset.
    #[serde(default)]
    pub header_ids: Vec<i64>,
    /// Exclusive lower bound on record ids.
    pub last_record_id: Option<i64>,
    pub max_results: Option<i64>,
}

impl DataRequest {
    fn after_id(&self) -> i64 {
        self.last_record_id.unwrap_or(BEFORE_FIRST_RECORD)
    }

    fn page_size(&self) -> i64 {
        match self.max_results {
            Some(n) if n > 0 => n,
            _ => DEFAULT_MAX_RESULTS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnData {
    pub header_id: i64,
    pub display_name: String,
    pub column_index: i64,
    pub values: Vec<String>,
}

/// Where the next page starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCursor {
    pub last_record_id: i64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header_ids: Vec<i64>,
}

impl DataCursor {
    /// Request for the page this cursor points at.
    pub fn to_request(&self, max_results: Option<i64>) -> DataRequest {
        DataRequest {
            header_ids: self.header_ids.clone(),
            last_record_id: Some(self.last_record_id),
            max_results,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPage {
    pub columns: Vec<ColumnData>,
    pub next: Option<DataCursor>,
}

pub struct DataReader {
    catalog: Arc<dyn CatalogManager>,
}

impl DataReader {
    pub fn new(catalog: Arc<dyn CatalogManager>) -> Self {
        Self { catalog }
    }

    #[tracing::instrument(
        name = "read_data_page",
        skip(self, request),
        fields(
            widedb.dataset_id = dataset_id,
            widedb.last_record_id = request.after_id(),
            widedb.upper_bound = tracing::field::Empty,
        )
    )]
    pub async fn read_page(
        &self,
        dataset_id: i64,
        request: &DataRequest,
    ) -> Result<DataPage, DatasetError> {
        if self.catalog.get_dataset(dataset_id).await?.is_none() {
            return Err(DatasetError::NotFound(dataset_id));
        }

        let headers = select_headers(self.catalog.list_headers(dataset_id).await?, &request.header_ids);
        if headers.is_empty() {
            return Ok(DataPage::default());
        }

        let after_id = request.after_id();
        let Some(upper_bound) = self
            .catalog
            .page_upper_bound(dataset_id, after_id, request.page_size())
            .await?
        else {
            return Ok(DataPage {
                columns: build_columns(&headers, Vec::new()),
                next: None,
            });
        };
        tracing::Span::current().record("widedb.upper_bound", upper_bound);

        let header_ids: Vec<i64> = headers.iter().map(|h| h.id).collect();
        let cells = self
            .catalog
            .list_cells(&header_ids, after_id, upper_bound)
            .await?;
        let columns = build_columns(&headers, cells);

        let max_record_id = self.catalog.max_record_id(dataset_id).await?;
        let next = match max_record_id {
            Some(max) if max > upper_bound => Some(DataCursor {
                last_record_id: upper_bound,
                header_ids: if request.header_ids.is_empty() {
                    Vec::new()
                } else {
                    header_ids
                },
            }),
            _ => None,
        };

        Ok(DataPage { columns, next })
    }
}

/// Keep the dataset's headers named by `filter`, in dataset order. Ids that
/// do not belong to the dataset are ignored.
fn select_headers(headers: Vec<HeaderInfo>, filter: &[i64]) -> Vec<HeaderInfo> {
    if filter.is_empty() {
        return headers;
    }
    let wanted: HashSet<i64> = filter.iter().copied().collect();
    headers
        .into_iter()
        .filter(|h| wanted.contains(&h.id))
        .collect()
}

/// Split cells ordered by (header_id, record_id) into one run per header.
fn group_by_header(cells: Vec<CellValue>) -> HashMap<i64, Vec<String>> {
    let mut grouped: HashMap<i64, Vec<String>> = HashMap::new();
    let mut current: Option<(i64, Vec<String>)> = None;

    for cell in cells {
        match current.as_mut() {
            Some((header_id, values)) if *header_id == cell.header_id => {
                values.push(cell.raw_value)
            }
            _ => {
                if let Some((header_id, values)) = current.take() {
                    grouped.insert(header_id, values);
                }
                current = Some((cell.header_id, vec![cell.raw_value]));
            }
        }
    }
    if let Some((header_id, values)) = current {
        grouped.insert(header_id, values);
    }

    grouped
}

fn build_columns(headers: &[HeaderInfo], cells: Vec<CellValue>) -> Vec<ColumnData> {
    let mut grouped = group_by_header(cells);
    headers
        .iter()
        .map(|h| ColumnData {
            header_id: h.id,
            display_name: h.display_name.clone(),
            column_index: h.column_index,
            values: grouped.remove(&h.id).unwrap_or_default(),
        })
        .collect()
}
