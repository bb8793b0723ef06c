use std::sync::Arc;

use safetynet_core::memory::MemoryStore;
use safetynet_core::{Actor, ActorId, RemoteStore, Role};
use safetynet_daemon::{Pairing, PairingError, ReconcileOutcome};

async fn store(transactional: bool) -> Arc<MemoryStore> {
    let store = Arc::new(if transactional {
        MemoryStore::new()
    } else {
        MemoryStore::without_transactions()
    });
    store
        .create_actor(Actor::new("g1", Role::Guardian, "g@example.com"))
        .await
        .expect("guardian");
    store
        .create_actor(Actor::new("d1", Role::Dependent, "d@example.com"))
        .await
        .expect("dependent");
    store
}

fn linked(store: &MemoryStore, id: &str) -> Option<ActorId> {
    store.actor(&ActorId::from(id)).expect("actor").linked_id
}

#[tokio::test]
async fn link_is_symmetric_with_transactions() {
    let store = store(true).await;
    let result = Pairing::new(store.clone())
        .link(&ActorId::from("g1"), "d1")
        .await
        .expect("link");
    assert_eq!(result.dependent, ActorId::from("d1"));
    assert_eq!(linked(&store, "g1"), Some(ActorId::from("d1")));
    assert_eq!(linked(&store, "d1"), Some(ActorId::from("g1")));
}

#[tokio::test]
async fn link_is_symmetric_with_sequential_writes() {
    let store = store(false).await;
    Pairing::new(store.clone())
        .link(&ActorId::from("g1"), " d1 ")
        .await
        .expect("link");
    assert_eq!(linked(&store, "g1"), Some(ActorId::from("d1")));
    assert_eq!(linked(&store, "d1"), Some(ActorId::from("g1")));
}

#[tokio::test]
async fn unknown_code_fails_and_mutates_nothing() {
    for transactional in [true, false] {
        let store = store(transactional).await;
        let before_g = store.actor(&ActorId::from("g1"));
        let before_d = store.actor(&ActorId::from("d1"));

        let err = Pairing::new(store.clone())
            .link(&ActorId::from("g1"), "no-such-code")
            .await
            .unwrap_err();
        assert!(matches!(err, PairingError::NotFound { ref code } if code == "no-such-code"));
        assert_eq!(store.actor(&ActorId::from("g1")), before_g);
        assert_eq!(store.actor(&ActorId::from("d1")), before_d);
    }
}

#[tokio::test]
async fn crash_between_writes_is_repaired_by_reconcile() {
    let store = store(false).await;
    // Only the first of the two writes lands.
    store.set_write_budget(Some(1));

    let pairing = Pairing::new(store.clone());
    let err = pairing.link(&ActorId::from("g1"), "d1").await.unwrap_err();
    assert!(matches!(err, PairingError::Store(_)));
    assert_eq!(linked(&store, "d1"), Some(ActorId::from("g1")));
    assert_eq!(linked(&store, "g1"), None);

    store.set_write_budget(None);
    let outcome = pairing.reconcile(&ActorId::from("d1")).await.expect("reconcile");
    assert_eq!(
        outcome,
        ReconcileOutcome::Completed {
            partner: ActorId::from("g1")
        }
    );
    assert_eq!(linked(&store, "g1"), Some(ActorId::from("d1")));

    let again = pairing.reconcile(&ActorId::from("g1")).await.expect("reconcile");
    assert_eq!(
        again,
        ReconcileOutcome::Consistent {
            partner: ActorId::from("d1")
        }
    );
}

#[tokio::test]
async fn retrying_link_after_crash_completes_the_pair() {
    let store = store(false).await;
    store.set_write_budget(Some(1));
    let pairing = Pairing::new(store.clone());
    assert!(pairing.link(&ActorId::from("g1"), "d1").await.is_err());

    store.set_write_budget(None);
    pairing.link(&ActorId::from("g1"), "d1").await.expect("retry");
    assert_eq!(linked(&store, "g1"), Some(ActorId::from("d1")));
    assert_eq!(linked(&store, "d1"), Some(ActorId::from("g1")));
}

#[tokio::test]
async fn reconcile_of_unlinked_actor_is_a_no_op() {
    let store = store(true).await;
    let outcome = Pairing::new(store.clone())
        .reconcile(&ActorId::from("g1"))
        .await
        .expect("reconcile");
    assert_eq!(outcome, ReconcileOutcome::Unlinked);
}
