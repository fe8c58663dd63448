use super::IngestOptions;
use crate::catalog::CatalogManager;
use crate::operation::OperationTracker;
use std::sync::Arc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Periodically recompute a dataset's record summary while an upload runs.
///
/// Stops when the operation is observed complete (checked every
/// `completion_poll`), when `counter_timeout` elapses, or when `shutdown`
/// is cancelled. Refresh failures are logged and retried on the next tick;
/// they never fail the upload.
pub async fn run_record_counter(
    catalog: Arc<dyn CatalogManager>,
    tracker: Arc<OperationTracker>,
    dataset_id: i64,
    options: IngestOptions,
    shutdown: CancellationToken,
) {
    let start = Instant::now();
    let mut refresh = interval_at(start + options.counter_refresh, options.counter_refresh);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut completion = interval_at(start + options.completion_poll, options.completion_poll);
    completion.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let ceiling = tokio::time::sleep(options.counter_timeout);
    tokio::pin!(ceiling);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!(widedb.operation_id = tracker.id(), "Record counter received shutdown signal");
                break;
            }
            _ = &mut ceiling => {
                warn!(
                    widedb.operation_id = tracker.id(),
                    "Record counter stopped after {:?} without the upload completing",
                    options.counter_timeout
                );
                break;
            }
            _ = refresh.tick() => {
                if let Err(e) = catalog.update_num_records(dataset_id).await {
                    warn!("Failed to refresh record count for dataset {}: {}", dataset_id, e);
                }
            }
            _ = completion.tick() => {
                if tracker.is_complete().await {
                    info!(widedb.operation_id = tracker.id(), "Record counter finished");
                    break;
                }
            }
        }
    }
}
