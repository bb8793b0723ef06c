//! Error types for safetynet-core and its collaborator traits.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::ActorId;

/// Errors from loading or saving [`crate::config::SafetyConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Underlying I/O failure, with the path that was being touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the offending file.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}

/// Errors reported by a [`crate::ports::RemoteStore`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("actor not found: {id}")]
    NotFound { id: ActorId },

    #[error("actor already exists: {id}")]
    AlreadyExists { id: ActorId },

    /// Network or backend failure; the operation may succeed if retried.
    #[error("transient store failure: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }
}

/// Errors reported by a [`crate::ports::LocationSensor`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SensorError {
    /// The OS refused location access. Never retried automatically.
    #[error("location permission denied: {0}")]
    PermissionDenied(String),

    #[error("location unavailable: {0}")]
    Unavailable(String),
}

/// Errors reported by a [`crate::ports::PushDispatch`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("push transport error: {0}")]
    Transport(String),

    #[error("push rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}
