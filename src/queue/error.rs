//! Errors of the queue registry and the operations built on it.

use std::sync::Arc;

use thiserror::Error;

use super::backend::StorageError;

/// Errors returned by queue registry operations.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Invalid queue name: {0}")]
    InvalidName(String),

    #[error("Not authorized for queue: {0}")]
    Unauthorized(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Opening the queue failed. Shared by every caller waiting on the
    /// same construction.
    #[error("Failed to open queue {queue}: {source}")]
    Construction {
        queue: String,
        source: Arc<StorageError>,
    },
}

impl QueueError {
    /// Status classification reported to clients.
    pub fn status_code(&self) -> u16 {
        match self {
            QueueError::InvalidName(_) => 400,
            QueueError::Unauthorized(_) => 403,
            QueueError::Storage(_) | QueueError::Construction { .. } => 500,
        }
    }
}
