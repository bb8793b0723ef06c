//! Shared flush entrypoint used by the capture scheduler and the daemon's
//! reconnect handling.

use safetynet_core::ActorId;

use crate::engine::{FlushReport, SyncEngine};
use crate::error::SyncError;
use crate::local_log;

/// Scope for a flush run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushScope {
    /// Every owner that has a local log.
    All,
    /// A single owner.
    Owner(ActorId),
}

/// Upload pending breadcrumbs for a scope.
pub async fn run(engine: &SyncEngine, scope: FlushScope) -> Result<Vec<FlushReport>, SyncError> {
    let owners = match scope {
        FlushScope::Owner(owner) => vec![owner],
        FlushScope::All => {
            let home = engine.home().to_path_buf();
            tokio::task::spawn_blocking(move || local_log::list_owners_at(&home))
                .await
                .map_err(|err| SyncError::Join(err.to_string()))??
        }
    };

    let mut reports = Vec::with_capacity(owners.len());
    for owner in owners {
        reports.push(engine.flush(&owner).await?);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use safetynet_core::{memory::MemoryStore, Coordinates};
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn run_all_with_no_logs_returns_empty_vec() {
        let home = TempDir::new().expect("home");
        let engine = SyncEngine::new(home.path(), Arc::new(MemoryStore::new()));
        let result = run(&engine, FlushScope::All).await.expect("run");
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn run_all_flushes_every_owner_after_reconnect() {
        let home = TempDir::new().expect("home");
        let store = Arc::new(MemoryStore::new());
        let engine = SyncEngine::new(home.path(), store.clone());

        store.set_offline(true);
        for owner in ["dep-a", "dep-b"] {
            engine
                .ingest(&ActorId::from(owner), Coordinates::new(1.0, 2.0), Utc::now())
                .await
                .expect("ingest");
        }
        store.set_offline(false);

        let reports = run(&engine, FlushScope::All).await.expect("run");
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.uploaded == 1 && r.pending == 0));
    }
}
