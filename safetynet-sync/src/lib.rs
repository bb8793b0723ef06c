//! # safetynet-sync
//!
//! Durable local breadcrumb log plus best-effort replication to the remote
//! store.
//!
//! Call [`SyncEngine::ingest`] for every captured sample, or [`pipeline::run`]
//! to flush pending uploads once connectivity returns.

pub mod cursor;
pub mod engine;
pub mod error;
pub mod local_log;
pub mod pipeline;

pub use engine::{FlushReport, IngestOutcome, SyncEngine};
pub use error::SyncError;
pub use local_log::LogEntry;
pub use pipeline::FlushScope;
