use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use widedb::datasets::{ColumnData, DataRequest, DatasetError};
use widedb::ingest::{CsvSource, InMemorySource, IngestOptions, MAX_BATCH_SIZE};
use widedb::operation::{Operation, OperationStatus};
use widedb::WideDbEngine;

async fn setup_engine() -> Result<(WideDbEngine, TempDir)> {
    engine_with_options(IngestOptions {
        batch_size: 2,
        counter_refresh: Duration::from_millis(20),
        completion_poll: Duration::from_millis(20),
        counter_timeout: Duration::from_secs(30),
    })
    .await
}

async fn engine_with_options(options: IngestOptions) -> Result<(WideDbEngine, TempDir)> {
    let temp_dir = tempfile::tempdir()?;
    let engine = WideDbEngine::builder()
        .base_dir(temp_dir.path())
        .ingest_options(options)
        .build()
        .await?;
    Ok((engine, temp_dir))
}

async fn wait_for_operation(engine: &WideDbEngine, operation_id: i64) -> Result<Operation> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    loop {
        let operation = engine.get_operation(operation_id).await?;
        if operation.is_complete() {
            return Ok(operation);
        }
        if tokio::time::Instant::now() > deadline {
            anyhow::bail!("operation {} did not finish: {:?}", operation_id, operation);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Upload `csv` and wait for the operation to finish.
async fn upload(engine: &WideDbEngine, dataset_id: i64, csv: &[u8]) -> Result<Operation> {
    let source: Arc<dyn CsvSource> = Arc::new(InMemorySource::new(csv.to_vec()));
    let handle = engine.upload_dataset(dataset_id, source).await?;
    assert_eq!(handle.url, format!("/v1/operations/{}", handle.operation_id));
    wait_for_operation(engine, handle.operation_id).await
}

async fn read_all_columns(engine: &WideDbEngine, dataset_id: i64) -> Result<Vec<ColumnData>> {
    let page = engine.get_data(dataset_id, &DataRequest::default()).await?;
    assert!(page.next.is_none());
    Ok(page.columns)
}

fn names(columns: &[ColumnData]) -> Vec<&str> {
    columns.iter().map(|c| c.display_name.as_str()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_untitled_datasets_are_numbered_by_id() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;

    let first = engine.create_dataset(None).await?;
    let second = engine.create_dataset(Some("")).await?;
    let named = engine.create_dataset(Some("survey")).await?;

    assert_eq!(first.dataset.display_name, format!("untitled-{}", first.dataset.id));
    assert_eq!(second.dataset.display_name, format!("untitled-{}", second.dataset.id));
    assert_eq!(named.dataset.display_name, "survey");
    assert_eq!(named.url, format!("/v1/datasets/{}", named.dataset.id));

    let list = engine.list_datasets(2).await?;
    assert_eq!(list.total_count, 3);
    assert_eq!(list.datasets.len(), 2);
    assert_eq!(list.datasets[0].id, first.dataset.id);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_creates_headers_records_and_cells() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(Some("basic")).await?.dataset;

    let operation = upload(&engine, dataset.id, b"a,b,c\n1,2,3\n4,5,6\n").await?;
    assert_eq!(operation.status, OperationStatus::Success);
    assert_eq!(operation.error_message, None);

    let headers = engine.get_headers(dataset.id).await?;
    let header_names: Vec<&str> = headers.iter().map(|h| h.display_name.as_str()).collect();
    assert_eq!(header_names, vec!["a", "b", "c"]);
    let indexes: Vec<i64> = headers.iter().map(|h| h.column_index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert!(headers.iter().all(|h| h.value_type == "RAW"));

    let refreshed = engine.get_dataset(dataset.id).await?;
    assert!(refreshed.headers_set);
    assert_eq!(refreshed.num_records, 2);
    assert!(refreshed.min_record_id.is_some());
    assert!(refreshed.max_record_id > refreshed.min_record_id);

    let columns = read_all_columns(&engine, dataset.id).await?;
    assert_eq!(names(&columns), vec!["a", "b", "c"]);
    assert_eq!(columns[0].values, vec!["1", "4"]);
    assert_eq!(columns[1].values, vec!["2", "5"]);
    assert_eq!(columns[2].values, vec!["3", "6"]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_upload_from_staged_file() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let staged = engine.stage_upload(b"name,score\nada,10\n".to_vec()).await?;
    assert!(staged.path().starts_with(engine.staging_dir()));
    assert_eq!(staged.size_bytes(), 18);

    let handle = engine.upload_dataset(dataset.id, Arc::new(staged)).await?;
    let operation = wait_for_operation(&engine, handle.operation_id).await?;
    assert_eq!(operation.status, OperationStatus::Success);

    let columns = read_all_columns(&engine, dataset.id).await?;
    assert_eq!(names(&columns), vec!["name", "score"]);
    assert_eq!(columns[0].values, vec!["ada"]);
    assert_eq!(columns[1].values, vec!["10"]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_file_succeeds_without_headers() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let operation = upload(&engine, dataset.id, b"").await?;
    assert_eq!(operation.status, OperationStatus::Success);

    assert!(engine.get_headers(dataset.id).await?.is_empty());
    let refreshed = engine.get_dataset(dataset.id).await?;
    assert!(!refreshed.headers_set);
    assert_eq!(refreshed.num_records, 0);

    let page = engine.get_data(dataset.id, &DataRequest::default()).await?;
    assert!(page.columns.is_empty());
    assert!(page.next.is_none());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_header_only_file_sets_headers_without_records() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let operation = upload(&engine, dataset.id, b"x,y\n").await?;
    assert_eq!(operation.status, OperationStatus::Success);

    let refreshed = engine.get_dataset(dataset.id).await?;
    assert!(refreshed.headers_set);
    assert_eq!(refreshed.num_records, 0);

    let columns = read_all_columns(&engine, dataset.id).await?;
    assert_eq!(names(&columns), vec!["x", "y"]);
    assert!(columns.iter().all(|c| c.values.is_empty()));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_wide_rows_extend_headers() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let operation = upload(&engine, dataset.id, b"a,b\n1,2,3,4\n5\n6,7,8\n").await?;
    assert_eq!(operation.status, OperationStatus::Success);

    let headers = engine.get_headers(dataset.id).await?;
    let header_names: Vec<&str> = headers.iter().map(|h| h.display_name.as_str()).collect();
    assert_eq!(header_names, vec!["a", "b", "column-3", "column-4"]);
    let indexes: Vec<i64> = headers.iter().map(|h| h.column_index).collect();
    assert_eq!(indexes, vec![0, 1, 2, 3]);

    let columns = read_all_columns(&engine, dataset.id).await?;
    assert_eq!(columns[0].values, vec!["1", "5", "6"]);
    assert_eq!(columns[1].values, vec!["2", "7"]);
    assert_eq!(columns[2].values, vec!["3", "8"]);
    assert_eq!(columns[3].values, vec!["4"]);
    assert_eq!(engine.get_dataset(dataset.id).await?.num_records, 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_quoted_and_empty_values_are_kept_verbatim() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let csv = b"note,count\n\"hello, world\",1\n\"two\nlines\",\n,3\n";
    let operation = upload(&engine, dataset.id, csv).await?;
    assert_eq!(operation.status, OperationStatus::Success);

    let columns = read_all_columns(&engine, dataset.id).await?;
    assert_eq!(columns[0].values, vec!["hello, world", "two\nlines", ""]);
    assert_eq!(columns[1].values, vec!["1", "", "3"]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_second_upload_treats_first_row_as_data() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let first = upload(&engine, dataset.id, b"a,b\n1,2\n").await?;
    assert_eq!(first.status, OperationStatus::Success);

    let second = upload(&engine, dataset.id, b"a,b\n3,4\n").await?;
    assert_eq!(second.status, OperationStatus::Success);
    assert_ne!(first.id, second.id);

    let headers = engine.get_headers(dataset.id).await?;
    assert_eq!(headers.len(), 2);

    let columns = read_all_columns(&engine, dataset.id).await?;
    assert_eq!(columns[0].values, vec!["1", "a", "3"]);
    assert_eq!(columns[1].values, vec!["2", "b", "4"]);
    assert_eq!(engine.get_dataset(dataset.id).await?.num_records, 3);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_utf8_fails_the_operation() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let operation = upload(&engine, dataset.id, b"a,b\n1,2\n\xff\xfe,3\n").await?;
    assert_eq!(operation.status, OperationStatus::Failed);
    let message = operation.error_message.unwrap_or_default();
    assert!(message.starts_with("csv read failed"), "{}", message);

    // The lease is released once the operation fails.
    let retry = upload(&engine, dataset.id, b"5,6\n").await?;
    assert_eq!(retry.status, OperationStatus::Success);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_upload_is_refused() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    // Hold the dataset's upload lease with an operation that never runs.
    let held = engine
        .catalog()
        .create_operation(dataset.id)
        .await?
        .expect("lease should be free");

    let source: Arc<dyn CsvSource> = Arc::new(InMemorySource::new("a\n1\n"));
    let err = engine
        .upload_dataset(dataset.id, source.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, DatasetError::UploadInProgress(id) if id == dataset.id));
    assert!(err.is_conflict());

    engine
        .catalog()
        .update_operation_status(held.id, "FAILED", Some("abandoned"))
        .await?;
    let handle = engine.upload_dataset(dataset.id, source).await?;
    let operation = wait_for_operation(&engine, handle.operation_id).await?;
    assert_eq!(operation.status, OperationStatus::Success);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unknown_ids_are_not_found() -> Result<()> {
    let (engine, _dir) = setup_engine().await?;

    let source: Arc<dyn CsvSource> = Arc::new(InMemorySource::new("a\n"));
    let err = engine.upload_dataset(404, source).await.unwrap_err();
    assert!(matches!(err, DatasetError::NotFound(404)));

    let err = engine.get_operation(404).await.unwrap_err();
    assert!(matches!(err, DatasetError::OperationNotFound(404)));
    assert!(err.is_not_found());

    let err = engine.get_headers(404).await.unwrap_err();
    assert!(err.is_not_found());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restart_fails_interrupted_operations() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;

    let engine = WideDbEngine::defaults(temp_dir.path()).await?;
    let dataset = engine.create_dataset(None).await?.dataset;
    let stale = engine
        .catalog()
        .create_operation(dataset.id)
        .await?
        .expect("lease should be free");
    engine.shutdown().await?;
    drop(engine);

    let engine = WideDbEngine::defaults(temp_dir.path()).await?;
    let operation = engine.get_operation(stale.id).await?;
    assert_eq!(operation.status, OperationStatus::Failed);
    assert_eq!(
        operation.error_message.as_deref(),
        Some("interrupted before completion")
    );

    let source: Arc<dyn CsvSource> = Arc::new(InMemorySource::new("a\n1\n"));
    let handle = engine.upload_dataset(dataset.id, source).await?;
    assert_ne!(handle.operation_id, stale.id);
    let operation = wait_for_operation(&engine, handle.operation_id).await?;
    assert_eq!(operation.status, OperationStatus::Success);

    engine.shutdown().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_large_batches_load_completely() -> Result<()> {
    let (engine, _dir) = engine_with_options(IngestOptions {
        batch_size: 50_000,
        ..Default::default()
    })
    .await?;
    let dataset = engine.create_dataset(None).await?.dataset;

    let rows = 20_000;
    let mut csv = String::from("value\n");
    for i in 0..rows {
        csv.push_str(&format!("{}\n", i));
    }
    let operation = upload(&engine, dataset.id, csv.as_bytes()).await?;
    assert_eq!(operation.status, OperationStatus::Success, "{:?}", operation);

    assert_eq!(engine.get_dataset(dataset.id).await?.num_records, rows);
    let page = engine
        .get_data(
            dataset.id,
            &DataRequest {
                max_results: Some(rows),
                ..Default::default()
            },
        )
        .await?;
    assert_eq!(page.columns[0].values.len(), rows as usize);
    assert_eq!(page.columns[0].values.last().map(String::as_str), Some("19999"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn test_builder_rejects_unusable_ingest_options() -> Result<()> {
    let cases = [
        IngestOptions {
            counter_refresh: Duration::ZERO,
            ..Default::default()
        },
        IngestOptions {
            completion_poll: Duration::ZERO,
            ..Default::default()
        },
        IngestOptions {
            counter_timeout: Duration::ZERO,
            ..Default::default()
        },
        IngestOptions {
            batch_size: 0,
            ..Default::default()
        },
        IngestOptions {
            batch_size: MAX_BATCH_SIZE + 1,
            ..Default::default()
        },
    ];

    for options in cases {
        let description = format!("{:?}", options);
        assert!(
            engine_with_options(options).await.is_err(),
            "accepted {}",
            description
        );
    }

    Ok(())
}
