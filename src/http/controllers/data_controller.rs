use crate::datasets::{DataCursor, DataRequest};
use crate::http::error::ApiError;
use crate::http::models::{DataResponse, NextPage};
use crate::WideDbEngine;
use axum::{
    extract::{Path, Query as QueryParams, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

/// Query parameters for reading dataset data
#[derive(Debug, Default, Deserialize)]
pub struct DataParams {
    /// Exclusive lower bound on record ids
    pub last_record_id: Option<i64>,
    /// Records per page (default: 100)
    pub max_results: Option<i64>,
    /// Comma-separated header ids; all headers when absent
    pub header_ids: Option<String>,
}

fn parse_header_ids(raw: Option<&str>) -> Result<Vec<i64>, ApiError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map_err(|_| ApiError::bad_request(format!("Invalid header id '{}'", s)))
        })
        .collect()
}

fn next_page_url(dataset_id: i64, cursor: &DataCursor, max_results: Option<i64>) -> String {
    let mut url = format!(
        "/v1/datasets/{}/data?last_record_id={}",
        dataset_id, cursor.last_record_id
    );
    if let Some(n) = max_results {
        url.push_str(&format!("&max_results={}", n));
    }
    if !cursor.header_ids.is_empty() {
        let ids: Vec<String> = cursor.header_ids.iter().map(i64::to_string).collect();
        url.push_str(&format!("&header_ids={}", ids.join(",")));
    }
    url
}

/// Handler for GET /v1/datasets/{id}/data - Read one page of columns
#[tracing::instrument(
    name = "handler_get_data",
    skip(engine, params),
    fields(widedb.dataset_id = %id, widedb.column_count = tracing::field::Empty)
)]
pub async fn get_data(
    State(engine): State<Arc<WideDbEngine>>,
    Path(id): Path<i64>,
    QueryParams(params): QueryParams<DataParams>,
) -> Result<Json<DataResponse>, ApiError> {
    let request = DataRequest {
        header_ids: parse_header_ids(params.header_ids.as_deref())?,
        last_record_id: params.last_record_id,
        max_results: params.max_results,
    };

    let page = engine.get_data(id, &request).await?;
    tracing::Span::current().record("widedb.column_count", page.columns.len());

    let next = page.next.map(|cursor| NextPage {
        url: next_page_url(id, &cursor, request.max_results),
        cursor,
    });

    Ok(Json(DataResponse {
        dataset_id: id,
        columns: page.columns,
        next,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_header_ids() {
        assert_eq!(parse_header_ids(None).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_header_ids(Some("")).unwrap(), Vec::<i64>::new());
        assert_eq!(parse_header_ids(Some("3, 1,")).unwrap(), vec![3, 1]);
        assert!(parse_header_ids(Some("1,x")).is_err());
    }

    #[test]
    fn test_next_page_url_carries_filter_and_page_size() {
        let cursor = DataCursor {
            last_record_id: 20,
            header_ids: vec![4, 5],
        };
        assert_eq!(
            next_page_url(9, &cursor, Some(10)),
            "/v1/datasets/9/data?last_record_id=20&max_results=10&header_ids=4,5"
        );

        let cursor = DataCursor {
            last_record_id: 20,
            header_ids: Vec::new(),
        };
        assert_eq!(
            next_page_url(9, &cursor, None),
            "/v1/datasets/9/data?last_record_id=20"
        );
    }
}
