//! Replication cursor: the highest log `seq` confirmed by the remote store.
//!
//! Persists a [`ReplicationCursor`] JSON document at
//! `<home>/.safetynet/cursors/<owner>.json`. Every local log entry above the
//! cursor is a pending upload. Writes use the `.tmp` + rename pattern so a
//! crash never leaves a half-written cursor.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use safetynet_core::ActorId;
use serde::{Deserialize, Serialize};

use crate::error::{io_err, SyncError};
use crate::local_log::file_stem;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationCursor {
    /// Every entry with `seq <= confirmed_seq` is known to be in the remote store.
    pub confirmed_seq: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for ReplicationCursor {
    fn default() -> Self {
        Self {
            confirmed_seq: 0,
            updated_at: None,
        }
    }
}

/// `<home>/.safetynet/cursors/<owner>.json`
pub fn cursor_path_at(home: &Path, owner: &ActorId) -> PathBuf {
    home.join(".safetynet")
        .join("cursors")
        .join(format!("{}.json", file_stem(owner)))
}

/// Load the cursor for `owner`; a missing file means nothing is confirmed.
pub fn load_at(home: &Path, owner: &ActorId) -> Result<ReplicationCursor, SyncError> {
    let path = cursor_path_at(home, owner);
    if !path.exists() {
        return Ok(ReplicationCursor::default());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    Ok(serde_json::from_str(&contents)?)
}

/// Save the cursor atomically: write `<path>.tmp`, then rename.
pub fn save_at(home: &Path, owner: &ActorId, cursor: &ReplicationCursor) -> Result<(), SyncError> {
    let path = cursor_path_at(home, owner);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid cursor path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(cursor)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, &json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}
