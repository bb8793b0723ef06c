use std::path::PathBuf;

use safetynet_core::{ActorId, StoreError};
use thiserror::Error;

/// Error surface for the daemon runtime, services and control protocol.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] safetynet_core::ConfigError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("sync error: {0}")]
    Sync(#[from] safetynet_sync::SyncError),

    #[error("pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("check-in window of {hours} hours cannot be armed")]
    InvalidDuration { hours: f64 },

    #[error("actor not found: {id}")]
    UnknownActor { id: ActorId },

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

/// Pairing failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum PairingError {
    /// No dependent matches the pairing code.
    #[error("no dependent matches pairing code '{code}'")]
    NotFound { code: String },

    /// One side is already paired with someone else. Pairs are permanent.
    #[error("{id} is already linked to another actor")]
    AlreadyLinked { id: ActorId },

    #[error("store error during pairing: {0}")]
    Store(#[from] StoreError),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
