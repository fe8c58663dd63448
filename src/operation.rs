//! Lifecycle of one ingestion run.
//!
//! An operation starts as `NOT_STARTED`, moves to `RUNNING` when the loader
//! picks it up and ends in `SUCCESS` or `FAILED`. Terminal states are sticky:
//! `RUNNING` can never be re-entered and `SUCCESS` on a terminal operation is
//! a no-op. `FAILED` can always be written again to replace the message.

use crate::catalog::{CatalogManager, OperationInfo};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    NotStarted,
    Running,
    Success,
    Failed,
}

impl OperationStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Running => "RUNNING",
            Self::Success => "SUCCESS",
            Self::Failed => "FAILED",
        }
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationStatus {
    type Err = OperationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "RUNNING" => Ok(Self::Running),
            "SUCCESS" => Ok(Self::Success),
            "FAILED" => Ok(Self::Failed),
            other => Err(OperationError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationEvent {
    MarkRunning,
    MarkSuccess,
    MarkFailed,
}

impl fmt::Display for OperationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MarkRunning => "mark_running",
            Self::MarkSuccess => "mark_success",
            Self::MarkFailed => "mark_failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("invalid operation transition: {event} from {from}")]
    InvalidTransition {
        from: OperationStatus,
        event: OperationEvent,
    },

    #[error("unknown operation status '{0}'")]
    UnknownStatus(String),

    #[error("catalog error: {0}")]
    Catalog(#[from] anyhow::Error),
}

/// Apply `event` to an operation in state `from`.
///
/// Returns the state to persist, `None` when the event is a no-op, or an
/// error when the transition is not allowed.
pub fn transition(
    from: OperationStatus,
    event: OperationEvent,
) -> Result<Option<OperationStatus>, OperationError> {
    use OperationEvent::*;
    use OperationStatus::*;

    match (from, event) {
        (NotStarted, MarkRunning) => Ok(Some(Running)),
        (_, MarkRunning) => Err(OperationError::InvalidTransition { from, event }),
        (NotStarted | Running, MarkSuccess) => Ok(Some(Success)),
        (Success | Failed, MarkSuccess) => Ok(None),
        (_, MarkFailed) => Ok(Some(Failed)),
    }
}

/// An operation as seen by callers polling an upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: i64,
    pub dataset_id: i64,
    pub status: OperationStatus,
    pub error_message: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Operation {
    pub fn is_complete(&self) -> bool {
        self.status.is_terminal()
    }
}

impl TryFrom<OperationInfo> for Operation {
    type Error = OperationError;

    fn try_from(info: OperationInfo) -> Result<Self, Self::Error> {
        Ok(Self {
            id: info.id,
            dataset_id: info.dataset_id,
            status: info.status.parse()?,
            error_message: info.error_message,
            created_at: info.created_at,
            updated_at: info.updated_at,
        })
    }
}

/// Persisted state machine for one running operation.
///
/// Each accepted transition is written to the catalog first and only then
/// applied in memory, so `is_complete` never reports a state the catalog
/// does not have.
pub struct OperationTracker {
    catalog: Arc<dyn CatalogManager>,
    id: i64,
    state: Mutex<Operation>,
}

impl fmt::Debug for OperationTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationTracker")
            .field("id", &self.id)
            .finish()
    }
}

impl OperationTracker {
    pub fn new(catalog: Arc<dyn CatalogManager>, operation: Operation) -> Self {
        Self {
            catalog,
            id: operation.id,
            state: Mutex::new(operation),
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub async fn mark_running(&self) -> Result<(), OperationError> {
        self.apply(OperationEvent::MarkRunning, None).await
    }

    pub async fn mark_success(&self) -> Result<(), OperationError> {
        self.apply(OperationEvent::MarkSuccess, None).await
    }

    pub async fn mark_failed(&self, message: &str) -> Result<(), OperationError> {
        self.apply(OperationEvent::MarkFailed, Some(message)).await
    }

    pub async fn is_complete(&self) -> bool {
        self.state.lock().await.is_complete()
    }

    pub async fn snapshot(&self) -> Operation {
        self.state.lock().await.clone()
    }

    async fn apply(
        &self,
        event: OperationEvent,
        message: Option<&str>,
    ) -> Result<(), OperationError> {
        let mut state = self.state.lock().await;
        let Some(next) = transition(state.status, event)? else {
            tracing::debug!(
                widedb.operation_id = self.id,
                status = %state.status,
                %event,
                "Ignoring no-op operation transition"
            );
            return Ok(());
        };

        self.catalog
            .update_operation_status(self.id, next.as_str(), message)
            .await?;

        tracing::debug!(
            widedb.operation_id = self.id,
            from = %state.status,
            to = %next,
            "Operation transitioned"
        );
        state.status = next;
        state.error_message = message.map(str::to_string);
        Ok(())
    }
}
