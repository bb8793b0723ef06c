//! Breadcrumb sync engine.
//!
//! ## `ingest`: write-ahead protocol
//!
//! 1. Take the owner's ingest lock (one ingest per owner at a time).
//! 2. Append to the durable local log and fsync. This is the durability
//!    boundary; an error here is the only way `ingest` fails.
//! 3. Upload every entry above the replication cursor, in capture order.
//! 4. Advance and save the cursor after each confirmed remote write.
//! 5. Stop at the first failure; the rest stays pending for the next
//!    ingest or an explicit flush. Failures after step 2 are reported in the
//!    [`FlushReport`], never as an `ingest` error.
//!
//! Delivery is at-least-once: a crash between steps 3 and 4 re-uploads one
//! entry, which downstream consumers tolerate because breadcrumbs are
//! immutable. An unreadable cursor is treated the same way and replays the
//! log from the start.
//!
//! The last seq and the cursor are cached per owner, so an ingest that finds
//! nothing else pending reads neither the log nor the cursor file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use safetynet_core::{ActorId, Breadcrumb, Coordinates, RemoteStore, StoreError};

use crate::cursor::{self, ReplicationCursor};
use crate::error::SyncError;
use crate::local_log::{self, LogEntry};

/// Result of one replication pass for an owner.
#[derive(Debug, Clone, PartialEq)]
pub struct FlushReport {
    pub owner: ActorId,
    /// Entries confirmed by the remote store during this pass.
    pub uploaded: usize,
    /// Entries still awaiting confirmation afterwards. A lower bound when
    /// `local_error` is set.
    pub pending: usize,
    pub confirmed_seq: u64,
    /// The remote failure that stopped the pass early, if any.
    pub last_error: Option<StoreError>,
    /// Local bookkeeping failure (log read, cursor I/O) that stopped the pass.
    pub local_error: Option<String>,
}

impl FlushReport {
    /// A pass that could not run past local bookkeeping.
    fn stalled(owner: &ActorId, pending: usize, err: &SyncError) -> Self {
        Self {
            owner: owner.clone(),
            uploaded: 0,
            pending,
            confirmed_seq: 0,
            last_error: None,
            local_error: Some(err.to_string()),
        }
    }
}

/// Result of one [`SyncEngine::ingest`].
#[derive(Debug, Clone, PartialEq)]
pub struct IngestOutcome {
    pub entry: LogEntry,
    pub flush: FlushReport,
}

impl IngestOutcome {
    /// Whether this sample is confirmed remotely.
    pub fn replicated(&self) -> bool {
        self.flush.confirmed_seq >= self.entry.seq
    }
}

#[derive(Debug, Default)]
struct OwnerState {
    /// Highest seq in the local log, once known.
    last_seq: Option<u64>,
    /// Cursor as last loaded or saved.
    cursor: Option<ReplicationCursor>,
}

pub struct SyncEngine {
    home: PathBuf,
    store: Arc<dyn RemoteStore>,
    owners: Mutex<HashMap<ActorId, Arc<tokio::sync::Mutex<OwnerState>>>>,
}

impl SyncEngine {
    pub fn new(home: impl Into<PathBuf>, store: Arc<dyn RemoteStore>) -> Self {
        Self {
            home: home.into(),
            store,
            owners: Mutex::new(HashMap::new()),
        }
    }

    pub fn home(&self) -> &Path {
        &self.home
    }

    fn owner_state(&self, owner: &ActorId) -> Arc<tokio::sync::Mutex<OwnerState>> {
        let mut owners = self
            .owners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        owners.entry(owner.clone()).or_default().clone()
    }

    /// Record one sample durably, then try to replicate everything pending.
    pub async fn ingest(
        &self,
        owner: &ActorId,
        coords: Coordinates,
        captured_at: DateTime<Utc>,
    ) -> Result<IngestOutcome, SyncError> {
        let state = self.owner_state(owner);
        let mut state = state.lock().await;

        let last_seq = match state.last_seq {
            Some(seq) => seq,
            None => {
                let owner = owner.clone();
                self.blocking(move |home| local_log::last_seq_at(home, &owner))
                    .await?
            }
        };
        let breadcrumb = Breadcrumb::new(owner.clone(), coords, captured_at);
        let appended = self
            .blocking(move |home| local_log::append_with_seq_at(home, &breadcrumb, last_seq + 1))
            .await;
        let entry = match appended {
            Ok(entry) => {
                state.last_seq = Some(entry.seq);
                entry
            }
            Err(err) => {
                // The line may or may not have landed; rescan next time.
                state.last_seq = None;
                return Err(err);
            }
        };

        let flush = match self.flush_locked(owner, &mut state, Some(&entry)).await {
            Ok(flush) => flush,
            Err(err) => {
                tracing::warn!(
                    "replication of {} stalled, seq {} kept locally: {}",
                    owner,
                    entry.seq,
                    err
                );
                FlushReport::stalled(owner, 1, &err)
            }
        };
        if flush.confirmed_seq < entry.seq {
            tracing::info!(
                "breadcrumb seq {} for {} kept locally ({} pending)",
                entry.seq,
                owner,
                flush.pending
            );
        }
        Ok(IngestOutcome { entry, flush })
    }

    /// Upload pending entries for `owner` (e.g. after connectivity returns).
    pub async fn flush(&self, owner: &ActorId) -> Result<FlushReport, SyncError> {
        let state = self.owner_state(owner);
        let mut state = state.lock().await;
        self.flush_locked(owner, &mut state, None).await
    }

    async fn flush_locked(
        &self,
        owner: &ActorId,
        state: &mut OwnerState,
        appended: Option<&LogEntry>,
    ) -> Result<FlushReport, SyncError> {
        let mut cursor = match state.cursor.clone() {
            Some(cursor) => cursor,
            None => {
                let loaded = self.load_cursor(owner).await?;
                state.cursor = Some(loaded.clone());
                loaded
            }
        };

        let pending: Vec<LogEntry> = match appended {
            Some(entry) if entry.seq == cursor.confirmed_seq + 1 => vec![entry.clone()],
            _ => {
                let owner = owner.clone();
                let confirmed = cursor.confirmed_seq;
                self.blocking(move |home| {
                    Ok(local_log::list_all_at(home, &owner)?
                        .into_iter()
                        .filter(|entry| entry.seq > confirmed)
                        .collect())
                })
                .await?
            }
        };
        let total = pending.len();
        let mut uploaded = 0usize;
        let mut last_error = None;
        let mut local_error = None;

        for entry in pending {
            if let Err(err) = self.store.append_breadcrumb(&entry.breadcrumb).await {
                tracing::warn!(
                    "upload of seq {} for {} failed, will retry: {}",
                    entry.seq,
                    owner,
                    err
                );
                last_error = Some(err);
                break;
            }
            uploaded += 1;
            cursor = ReplicationCursor {
                confirmed_seq: entry.seq,
                updated_at: Some(Utc::now()),
            };
            let (key, snapshot) = (owner.clone(), cursor.clone());
            match self
                .blocking(move |home| cursor::save_at(home, &key, &snapshot))
                .await
            {
                Ok(()) => state.cursor = Some(cursor.clone()),
                Err(err) => {
                    tracing::warn!("cursor save for {} failed: {}", owner, err);
                    state.cursor = None;
                    local_error = Some(err.to_string());
                    break;
                }
            }
        }

        if uploaded > 0 {
            tracing::debug!("replicated {} breadcrumb(s) for {}", uploaded, owner);
        }
        Ok(FlushReport {
            owner: owner.clone(),
            uploaded,
            pending: total - uploaded,
            confirmed_seq: cursor.confirmed_seq,
            last_error,
            local_error,
        })
    }

    /// Load the cursor; an unreadable one replays the whole log.
    async fn load_cursor(&self, owner: &ActorId) -> Result<ReplicationCursor, SyncError> {
        let key = owner.clone();
        match self.blocking(move |home| cursor::load_at(home, &key)).await {
            Err(SyncError::Json(err)) => {
                tracing::warn!(
                    "unreadable replication cursor for {}, replaying log: {}",
                    owner,
                    err
                );
                Ok(ReplicationCursor::default())
            }
            other => other,
        }
    }

    /// Entries not yet confirmed remotely.
    pub async fn pending(&self, owner: &ActorId) -> Result<Vec<LogEntry>, SyncError> {
        let confirmed = self.load_cursor(owner).await?.confirmed_seq;
        let owner = owner.clone();
        self.blocking(move |home| {
            Ok(local_log::list_all_at(home, &owner)?
                .into_iter()
                .filter(|entry| entry.seq > confirmed)
                .collect())
        })
        .await
    }

    /// The owner's local breadcrumb history in capture order.
    pub async fn local_history(&self, owner: &ActorId) -> Result<Vec<Breadcrumb>, SyncError> {
        let owner = owner.clone();
        self.blocking(move |home| {
            Ok(local_log::list_all_at(home, &owner)?
                .into_iter()
                .map(|entry| entry.breadcrumb)
                .collect())
        })
        .await
    }

    /// Run local-log I/O off the async executor. The closure runs to
    /// completion even if the awaiting future is dropped.
    async fn blocking<T, F>(&self, f: F) -> Result<T, SyncError>
    where
        T: Send + 'static,
        F: FnOnce(&Path) -> Result<T, SyncError> + Send + 'static,
    {
        let home = self.home.clone();
        tokio::task::spawn_blocking(move || f(&home))
            .await
            .map_err(|err| SyncError::Join(err.to_string()))?
    }
}
