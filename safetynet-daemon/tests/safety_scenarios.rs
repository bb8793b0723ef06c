use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use rstest::rstest;
use tempfile::TempDir;

use safetynet_core::memory::{ManualSensor, MemoryStore, RecordingPush};
use safetynet_core::{
    Actor, ActorId, ActorPatch, Coordinates, FieldUpdate, Notifier, RemoteStore, Role,
    SafetyConfig, SafetyStatus, SensorError,
};
use safetynet_daemon::SafetyService;
use safetynet_sync::SyncEngine;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 14, 9, 30, 0).unwrap()
}

struct Harness {
    _home: TempDir,
    store: Arc<MemoryStore>,
    sensor: Arc<ManualSensor>,
    push: Arc<RecordingPush>,
    service: SafetyService,
    dependent: ActorId,
}

async fn harness() -> Harness {
    let home = TempDir::new().expect("home");
    let store = Arc::new(MemoryStore::new());
    let sensor = Arc::new(ManualSensor::new());
    let push = Arc::new(RecordingPush::new());

    let mut guardian = Actor::new("g1", Role::Guardian, "g@example.com");
    guardian.linked_id = Some(ActorId::from("d1"));
    guardian.push_token = Some("guardian-token".to_string());
    let mut dependent = Actor::new("d1", Role::Dependent, "d@example.com");
    dependent.linked_id = Some(ActorId::from("g1"));
    store.create_actor(guardian).await.expect("guardian");
    store.create_actor(dependent).await.expect("dependent");

    let engine = Arc::new(SyncEngine::new(home.path(), store.clone()));
    let service = SafetyService::new(
        store.clone(),
        sensor.clone(),
        engine,
        Notifier::new(push.clone()),
        SafetyConfig::default(),
    );
    Harness {
        _home: home,
        store,
        sensor,
        push,
        service,
        dependent: ActorId::from("d1"),
    }
}

#[tokio::test]
async fn two_hour_window_goes_overdue_one_second_after_deadline() {
    let h = harness().await;
    h.service.set_duration(&h.dependent, 2.0).await.expect("duration");

    let before = h.store.actor(&h.dependent).expect("actor");
    assert_eq!(before.safety.status, SafetyStatus::Pending);
    assert_eq!(before.safety.next_check_in_deadline, None);

    let outcome = h.service.ping_at(&h.dependent, t0()).await.expect("ping");
    assert_eq!(outcome.deadline, t0() + Duration::hours(2));

    let actor = h.store.actor(&h.dependent).expect("actor");
    assert_eq!(actor.safety.status, SafetyStatus::Safe);
    assert_eq!(actor.safety.last_ping_at, Some(t0()));
    assert!(!SafetyService::evaluate_overdue(&actor, t0() + Duration::hours(2)));
    assert!(SafetyService::evaluate_overdue(
        &actor,
        t0() + Duration::hours(2) + Duration::seconds(1)
    ));
    assert_eq!(
        SafetyService::countdown(&actor, t0() + Duration::minutes(30)).to_string(),
        "1h 30m 00s"
    );
}

#[rstest]
#[case(Some(0.0))]
#[case(Some(-5.0))]
#[case(Some(f64::NAN))]
#[case(Some(1e12))]
#[case(Some(f64::MAX))]
#[case(None)]
#[tokio::test]
async fn invalid_duration_arms_exactly_one_hour(#[case] stored: Option<f64>) {
    let h = harness().await;
    if let Some(hours) = stored {
        h.service.set_duration(&h.dependent, hours).await.expect("duration");
    }

    let outcome = h.service.ping_at(&h.dependent, t0()).await.expect("ping");
    assert_eq!(outcome.duration_hours, 1.0);
    assert_eq!(
        h.store.actor(&h.dependent).unwrap().safety.next_check_in_deadline,
        Some(t0() + Duration::hours(1))
    );
}

#[tokio::test]
async fn each_ping_rearms_from_its_own_call_time() {
    let h = harness().await;
    let pings = [
        (t0(), 2.0),
        (t0() + Duration::minutes(10), 0.5),
        (t0() + Duration::hours(5), 3.0),
    ];
    for (at, hours) in pings {
        h.service.set_duration(&h.dependent, hours).await.expect("duration");
        h.service.ping_at(&h.dependent, at).await.expect("ping");
        let deadline = h.store.actor(&h.dependent).unwrap().safety.next_check_in_deadline;
        assert_eq!(
            deadline,
            Some(at + Duration::milliseconds((hours * 3_600_000.0) as i64))
        );
    }
}

#[tokio::test]
async fn panic_raises_sos_uploads_fix_and_alerts_guardian_once() {
    let h = harness().await;
    let here = Coordinates::new(40.0, -74.0);
    h.sensor.set_current(Ok(ManualSensor::sample_now(here)));

    let outcome = h.service.panic_at(&h.dependent, t0()).await.expect("panic");
    assert_eq!(outcome.breadcrumb_seq, Some(1));
    assert!(outcome.replicated);
    assert!(outcome.notified);

    let actor = h.store.actor(&h.dependent).unwrap();
    assert_eq!(actor.safety.status, SafetyStatus::Sos);
    assert_eq!(actor.safety.panic_at, Some(t0()));
    assert_eq!(actor.safety.next_check_in_deadline, None);

    let crumbs = h.store.breadcrumbs(&h.dependent);
    assert_eq!(crumbs.len(), 1);
    assert_eq!(crumbs[0].coords(), here);

    let sent = h.push.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].token, "guardian-token");
    assert_eq!(sent[0].title, "SOS");

    // sos does not clear itself; only a ping returns to safe.
    let later = h.store.actor(&h.dependent).unwrap();
    assert!(!SafetyService::evaluate_overdue(&later, t0() + Duration::days(1)));

    h.service
        .ping_at(&h.dependent, t0() + Duration::minutes(5))
        .await
        .expect("ping");
    assert_eq!(
        h.store.actor(&h.dependent).unwrap().safety.status,
        SafetyStatus::Safe
    );
    assert_eq!(h.push.sent().len(), 1);
}

#[tokio::test]
async fn panic_without_fix_still_raises_sos() {
    let h = harness().await;
    h.sensor
        .set_current(Err(SensorError::Unavailable("indoors".to_string())));

    let outcome = h.service.panic_at(&h.dependent, t0()).await.expect("panic");
    assert_eq!(outcome.breadcrumb_seq, None);
    assert!(outcome.notified);
    assert_eq!(
        h.store.actor(&h.dependent).unwrap().safety.status,
        SafetyStatus::Sos
    );
    assert!(h.store.breadcrumbs(&h.dependent).is_empty());
}

#[tokio::test]
async fn panic_with_store_offline_is_surfaced() {
    let h = harness().await;
    h.sensor
        .set_current(Ok(ManualSensor::sample_now(Coordinates::new(40.0, -74.0))));
    h.store.set_offline(true);

    assert!(h.service.panic_at(&h.dependent, t0()).await.is_err());
    assert!(h.push.sent().is_empty());
}

#[tokio::test]
async fn panic_records_breadcrumb_when_cursor_is_unusable() {
    let h = harness().await;
    std::fs::create_dir_all(safetynet_sync::cursor::cursor_path_at(h._home.path(), &h.dependent))
        .expect("mkdir");
    h.sensor
        .set_current(Ok(ManualSensor::sample_now(Coordinates::new(40.0, -74.0))));

    let outcome = h.service.panic_at(&h.dependent, t0()).await.expect("panic");
    assert_eq!(outcome.breadcrumb_seq, Some(1));
    assert!(outcome.notified);
}

#[tokio::test]
async fn push_failure_does_not_fail_panic() {
    let h = harness().await;
    h.push.set_failing(true);
    let outcome = h.service.panic_at(&h.dependent, t0()).await.expect("panic");
    assert!(outcome.notified);
    assert_eq!(
        h.store.actor(&h.dependent).unwrap().safety.status,
        SafetyStatus::Sos
    );
}

#[tokio::test]
async fn ping_and_destination_writes_do_not_clobber_each_other() {
    let h = harness().await;
    let service = Arc::new(h.service);

    let mut handles = Vec::new();
    for i in 0..10 {
        let service = service.clone();
        let dependent = h.dependent.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                service.ping_at(&dependent, t0()).await.map(|_| ())
            } else {
                service
                    .set_destination(&dependent, Coordinates::new(40.0, -74.0), Some("Home".into()))
                    .await
                    .map(|_| ())
            }
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("write");
    }

    let actor = h.store.actor(&h.dependent).unwrap();
    assert_eq!(actor.safety.status, SafetyStatus::Safe);
    assert_eq!(actor.destination.expect("destination").label, "Home");
}

#[tokio::test]
async fn new_destination_resets_arrival() {
    let h = harness().await;
    h.service
        .set_destination(&h.dependent, Coordinates::new(40.0, -74.0), None)
        .await
        .expect("set");
    h.store
        .update_actor(
            &h.dependent,
            &ActorPatch::new().set(FieldUpdate::DestinationArrived(true)),
        )
        .await
        .expect("arrive");

    let dest = h
        .service
        .set_destination(&h.dependent, Coordinates::new(41.0, -73.0), Some("Office".into()))
        .await
        .expect("replace");
    assert!(!dest.arrived);
    assert!(!h.store.actor(&h.dependent).unwrap().destination.unwrap().arrived);

    h.service.clear_destination(&h.dependent).await.expect("clear");
    assert!(h.store.actor(&h.dependent).unwrap().destination.is_none());
}

#[tokio::test]
async fn subscribers_see_every_committed_change() {
    let h = harness().await;
    let mut changes = h.service.subscribe_to_actor(&h.dependent).await.expect("subscribe");

    h.service.ping_at(&h.dependent, t0()).await.expect("ping");
    let seen = changes.recv().await.expect("change");
    assert_eq!(seen.safety.status, SafetyStatus::Safe);
}

#[tokio::test]
async fn unknown_actor_is_reported() {
    let h = harness().await;
    let err = h
        .service
        .ping_at(&ActorId::from("ghost"), t0())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("ghost"));
}
