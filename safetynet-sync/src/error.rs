//! Error types for safetynet-sync.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from local logging and replication.
#[derive(Debug, Error)]
pub enum SyncError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization/deserialization error (log entries, cursor).
    #[error("local log JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking local-log task panicked or was cancelled.
    #[error("local log task failed: {0}")]
    Join(String),
}

/// Convenience constructor for [`SyncError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> SyncError {
    SyncError::Io {
        path: path.into(),
        source,
    }
}
