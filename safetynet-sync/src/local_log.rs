//! Durable local breadcrumb log, the write-ahead half of replication.
//!
//! One JSON-lines file per owner at
//! `<home>/.safetynet/breadcrumbs/<owner>.jsonl`. Each line is a [`LogEntry`]
//! carrying a monotonically increasing `seq` and the SHA-256 of the
//! breadcrumb payload, so a line torn by a crash mid-append is detected and
//! skipped on read instead of poisoning the whole log.
//!
//! Appends are fsynced before returning; an entry that an append reported
//! is on disk.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use safetynet_core::{ActorId, Breadcrumb};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cursor;
use crate::error::{io_err, SyncError};

/// One line of the local log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// 1-based position in capture order.
    pub seq: u64,
    /// SHA-256 hex of the breadcrumb's JSON encoding.
    pub digest: String,
    pub breadcrumb: Breadcrumb,
}

/// `<home>/.safetynet/breadcrumbs/`
pub fn log_dir_at(home: &Path) -> PathBuf {
    home.join(".safetynet").join("breadcrumbs")
}

/// `<home>/.safetynet/breadcrumbs/<owner>.jsonl`
pub fn log_path_at(home: &Path, owner: &ActorId) -> PathBuf {
    log_dir_at(home).join(format!("{}.jsonl", file_stem(owner)))
}

/// File-system-safe stem for an owner id. Ids outside `[A-Za-z0-9_-]` are
/// hex-encoded behind an `x` prefix.
pub(crate) fn file_stem(owner: &ActorId) -> String {
    let plain = !owner.0.is_empty()
        && owner
            .0
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if plain {
        owner.0.clone()
    } else {
        format!("x{}", hex::encode(owner.0.as_bytes()))
    }
}

pub(crate) fn digest_of(breadcrumb: &Breadcrumb) -> Result<String, SyncError> {
    let bytes = serde_json::to_vec(breadcrumb)?;
    let mut h = Sha256::new();
    h.update(&bytes);
    Ok(hex::encode(h.finalize()))
}

/// Append `breadcrumb` to its owner's log and fsync, numbering it after the
/// last intact entry. Scans the log; callers that track the last seq use
/// [`append_with_seq_at`].
pub fn append_at(home: &Path, breadcrumb: &Breadcrumb) -> Result<LogEntry, SyncError> {
    let last_seq = last_seq_at(home, &breadcrumb.owner_id)?;
    append_with_seq_at(home, breadcrumb, last_seq + 1)
}

/// Highest intact `seq` in the owner's log, or 0 if there is none.
pub fn last_seq_at(home: &Path, owner: &ActorId) -> Result<u64, SyncError> {
    Ok(list_all_at(home, owner)?
        .iter()
        .map(|entry| entry.seq)
        .max()
        .unwrap_or(0))
}

/// Append `breadcrumb` as entry `seq` and fsync.
pub fn append_with_seq_at(
    home: &Path,
    breadcrumb: &Breadcrumb,
    seq: u64,
) -> Result<LogEntry, SyncError> {
    let path = log_path_at(home, &breadcrumb.owner_id);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid log path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let entry = LogEntry {
        seq,
        digest: digest_of(breadcrumb)?,
        breadcrumb: breadcrumb.clone(),
    };

    let mut line = serde_json::to_string(&entry)?;
    line.push('\n');
    // A torn previous append leaves no trailing newline; start a fresh line so
    // the damage stays confined to that one entry.
    if !ends_with_newline(&path)? {
        line.insert(0, '\n');
    }

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| io_err(&path, e))?;
    file.write_all(line.as_bytes())
        .map_err(|e| io_err(&path, e))?;
    file.sync_data().map_err(|e| io_err(&path, e))?;

    tracing::debug!("appended seq {} to {}", entry.seq, path.display());
    Ok(entry)
}

fn ends_with_newline(path: &Path) -> Result<bool, SyncError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(io_err(path, err)),
    };
    let len = file.metadata().map_err(|e| io_err(path, e))?.len();
    if len == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1)).map_err(|e| io_err(path, e))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last).map_err(|e| io_err(path, e))?;
    Ok(last[0] == b'\n')
}

/// Every intact entry for `owner`, in capture order.
///
/// Returns an empty list if the log does not exist yet.
pub fn list_all_at(home: &Path, owner: &ActorId) -> Result<Vec<LogEntry>, SyncError> {
    read_log(&log_path_at(home, owner))
}

fn read_log(path: &Path) -> Result<Vec<LogEntry>, SyncError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(path, err)),
    };

    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| io_err(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry = match serde_json::from_str(&line) {
            Ok(entry) => entry,
            Err(err) => {
                tracing::warn!(
                    "skipping unreadable line {} in {}: {}",
                    index + 1,
                    path.display(),
                    err
                );
                continue;
            }
        };
        if digest_of(&entry.breadcrumb)? != entry.digest {
            tracing::warn!(
                "skipping line {} in {}: digest mismatch",
                index + 1,
                path.display()
            );
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

/// Owners that have a local log, sorted by id.
pub fn list_owners_at(home: &Path) -> Result<Vec<ActorId>, SyncError> {
    let dir = log_dir_at(home);
    let read = match std::fs::read_dir(&dir) {
        Ok(read) => read,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
        Err(err) => return Err(io_err(&dir, err)),
    };

    let mut owners = Vec::new();
    for entry in read {
        let entry = entry.map_err(|e| io_err(&dir, e))?;
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("jsonl") {
            continue;
        }
        if let Some(first) = read_log(&path)?.into_iter().next() {
            owners.push(first.breadcrumb.owner_id);
        }
    }
    owners.sort();
    owners.dedup();
    Ok(owners)
}

/// Remove the owner's log and its replication cursor.
///
/// Only meaningful for the local-only deployment variant: on a replicated
/// deployment this discards samples that may not have been uploaded yet.
pub fn clear_at(home: &Path, owner: &ActorId) -> Result<(), SyncError> {
    for path in [log_path_at(home, owner), cursor::cursor_path_at(home, owner)] {
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(io_err(&path, err)),
        }
    }
    tracing::info!("cleared local log for {}", owner);
    Ok(())
}
