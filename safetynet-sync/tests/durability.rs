//! Write-ahead durability of the breadcrumb sync engine across simulated
//! crashes and outages.

use std::sync::Arc;

use chrono::{Duration, Utc};
use safetynet_core::{memory::MemoryStore, ActorId, Coordinates};
use safetynet_sync::{cursor, local_log, pipeline, FlushScope, SyncEngine};
use tempfile::TempDir;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn owner() -> ActorId {
    ActorId::from("child_456")
}

#[tokio::test]
async fn sample_survives_crash_before_network_completion() {
    init_logging();
    let home = TempDir::new().expect("home");
    let store = Arc::new(MemoryStore::new());
    store.set_offline(true);

    {
        let engine = SyncEngine::new(home.path(), store.clone());
        engine
            .ingest(&owner(), Coordinates::new(40.0, -74.0), Utc::now())
            .await
            .expect("ingest succeeds while offline");
        // Engine dropped here: the process "crashes" with the upload unconfirmed.
    }

    let entries = local_log::list_all_at(home.path(), &owner()).expect("read log");
    assert_eq!(entries.len(), 1, "sample must be in the local log");
    assert_eq!(
        cursor::load_at(home.path(), &owner()).expect("cursor").confirmed_seq,
        0,
        "nothing is confirmed yet"
    );

    let restarted = SyncEngine::new(home.path(), store.clone());
    assert_eq!(restarted.pending(&owner()).await.expect("pending").len(), 1);

    store.set_offline(false);
    let report = restarted.flush(&owner()).await.expect("flush");
    assert_eq!(report.uploaded, 1);
    assert_eq!(report.pending, 0);
    assert!(restarted.pending(&owner()).await.expect("pending").is_empty());
    assert_eq!(store.breadcrumbs(&owner()).len(), 1);
}

#[tokio::test]
async fn pending_marker_is_only_cleared_by_confirmed_writes() {
    init_logging();
    let home = TempDir::new().expect("home");
    let store = Arc::new(MemoryStore::new());
    let engine = SyncEngine::new(home.path(), store.clone());
    let t0 = Utc::now();

    store.set_offline(true);
    for i in 0..3 {
        engine
            .ingest(&owner(), Coordinates::new(40.0, -74.0), t0 + Duration::minutes(i))
            .await
            .expect("ingest");
    }
    let report = engine.flush(&owner()).await.expect("flush while offline");
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.pending, 3);
    assert!(report.last_error.expect("error recorded").is_transient());

    store.set_offline(false);
    let reports = pipeline::run(&engine, FlushScope::Owner(owner()))
        .await
        .expect("reconnect flush");
    assert_eq!(reports[0].uploaded, 3);
    assert_eq!(reports[0].confirmed_seq, 3);

    let remote = store.breadcrumbs(&owner());
    let times: Vec<_> = remote.iter().map(|b| b.captured_at).collect();
    assert!(times.windows(2).all(|w| w[0] < w[1]), "capture order preserved");
}

#[tokio::test]
async fn concurrent_ingests_for_one_owner_are_serialized() {
    init_logging();
    let home = TempDir::new().expect("home");
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(SyncEngine::new(home.path(), store.clone()));
    let t0 = Utc::now();

    let mut handles = Vec::new();
    for i in 0..8 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .ingest(&owner(), Coordinates::new(1.0, 1.0), t0 + Duration::seconds(i))
                .await
                .expect("ingest")
        }));
    }
    for handle in handles {
        handle.await.expect("join");
    }

    let seqs: Vec<u64> = local_log::list_all_at(home.path(), &owner())
        .expect("read log")
        .iter()
        .map(|e| e.seq)
        .collect();
    assert_eq!(seqs, (1..=8).collect::<Vec<_>>(), "no duplicated or lost seq");
    assert_eq!(store.breadcrumbs(&owner()).len(), 8);
}
