//! Durable capture registrations.
//!
//! `<home>/.safetynet/run/registrations.json` holds one record per owner:
//! the stable task id, its trigger thresholds, and whether capture should be
//! re-attached on the next start. A denied registration stays on disk with
//! `enabled: false` until `register` is called again.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use safetynet_core::{ActorId, CaptureParams};
use serde::{Deserialize, Serialize};

use crate::error::{io_err, DaemonError};
use crate::paths::{capture_task_id, registrations_path};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub owner: ActorId,
    pub task_id: String,
    pub params: CaptureParams,
    pub enabled: bool,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub denied_reason: Option<String>,
}

impl Registration {
    pub fn new(owner: ActorId, params: CaptureParams, now: DateTime<Utc>) -> Self {
        Self {
            task_id: capture_task_id(&owner),
            owner,
            params,
            enabled: true,
            registered_at: now,
            denied_reason: None,
        }
    }
}

/// Keyed by owner id string so the file stays stable across writes.
pub type Registrations = BTreeMap<String, Registration>;

pub fn load_at(home: &Path) -> Result<Registrations, DaemonError> {
    let path = registrations_path(home);
    if !path.exists() {
        return Ok(Registrations::new());
    }
    let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
    if contents.trim().is_empty() {
        return Ok(Registrations::new());
    }
    Ok(serde_json::from_str(&contents)?)
}

/// Atomic save via `<path>.tmp` + rename.
pub fn save_at(home: &Path, registrations: &Registrations) -> Result<(), DaemonError> {
    let path = registrations_path(home);
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid registrations path")));
    };
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;

    let json = serde_json::to_string_pretty(registrations)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    std::fs::rename(&tmp, &path).map_err(|e| io_err(&path, e))?;
    Ok(())
}

/// Insert or replace the record for `registration.owner`.
pub fn upsert_at(home: &Path, registration: Registration) -> Result<(), DaemonError> {
    let mut all = load_at(home)?;
    all.insert(registration.owner.0.clone(), registration);
    save_at(home, &all)
}

/// Returns whether a record was removed.
pub fn remove_at(home: &Path, owner: &ActorId) -> Result<bool, DaemonError> {
    let mut all = load_at(home)?;
    let removed = all.remove(&owner.0).is_some();
    if removed {
        save_at(home, &all)?;
    }
    Ok(removed)
}

/// Keep the record but stop re-attaching it on start.
pub fn disable_at(home: &Path, owner: &ActorId, reason: &str) -> Result<(), DaemonError> {
    let mut all = load_at(home)?;
    if let Some(record) = all.get_mut(&owner.0) {
        record.enabled = false;
        record.denied_reason = Some(reason.to_string());
        save_at(home, &all)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(owner: &str) -> Registration {
        Registration::new(ActorId::from(owner), CaptureParams::default(), Utc::now())
    }

    #[test]
    fn empty_when_missing() {
        let home = TempDir::new().expect("home");
        assert!(load_at(home.path()).expect("load").is_empty());
    }

    #[test]
    fn upsert_replaces_rather_than_duplicates() {
        let home = TempDir::new().expect("home");
        upsert_at(home.path(), record("dep")).expect("first");
        upsert_at(home.path(), record("dep")).expect("second");

        let all = load_at(home.path()).expect("load");
        assert_eq!(all.len(), 1);
        assert_eq!(all["dep"].task_id, "safetynet-background-location:dep");
        assert!(all["dep"].enabled);
    }

    #[test]
    fn disable_keeps_record_with_reason() {
        let home = TempDir::new().expect("home");
        upsert_at(home.path(), record("dep")).expect("upsert");
        disable_at(home.path(), &ActorId::from("dep"), "revoked").expect("disable");

        let all = load_at(home.path()).expect("load");
        assert!(!all["dep"].enabled);
        assert_eq!(all["dep"].denied_reason.as_deref(), Some("revoked"));
    }

    #[test]
    fn remove_reports_whether_present() {
        let home = TempDir::new().expect("home");
        upsert_at(home.path(), record("dep")).expect("upsert");
        assert!(remove_at(home.path(), &ActorId::from("dep")).expect("remove"));
        assert!(!remove_at(home.path(), &ActorId::from("dep")).expect("remove again"));
        assert!(!registrations_path(home.path()).with_extension("json.tmp").exists());
    }
}
