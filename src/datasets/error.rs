//! Error types for dataset operations.

/// Errors that can occur during dataset operations.
#[derive(Debug)]
pub enum DatasetError {
    /// Dataset not found.
    NotFound(i64),
    /// Operation not found.
    OperationNotFound(i64),
    /// Another upload to the same dataset has not finished yet.
    UploadInProgress(i64),
    /// The upload body could not be staged for ingestion.
    Staging(std::io::Error),
    /// Catalog error (database operations).
    Catalog(anyhow::Error),
}

impl std::fmt::Display for DatasetError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "Dataset '{}' not found", id),
            Self::OperationNotFound(id) => write!(f, "Operation '{}' not found", id),
            Self::UploadInProgress(id) => {
                write!(f, "Dataset '{}' already has an upload in progress", id)
            }
            Self::Staging(e) => write!(f, "Failed to stage upload: {}", e),
            Self::Catalog(e) => write!(f, "Catalog error: {}", e),
        }
    }
}

impl std::error::Error for DatasetError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Staging(e) => Some(e),
            Self::Catalog(e) => e.source(),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for DatasetError {
    fn from(e: anyhow::Error) -> Self {
        Self::Catalog(e)
    }
}

impl DatasetError {
    /// Returns true if this is a client error (4xx).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound(_) | Self::OperationNotFound(_) | Self::UploadInProgress(_)
        )
    }

    /// Returns true if this is a not found error (404).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::OperationNotFound(_))
    }

    /// Returns true if this is a conflict error (409).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::UploadInProgress(_))
    }
}
