//! Guardian/dependent pairing.
//!
//! With a transactional store both `linked_id` fields are written together.
//! Otherwise the dependent side is written first, then the guardian side,
//! each guarded by `LinkedToNoneOr` so an existing pair is never overwritten.
//! A crash between the two writes leaves the dependent pointing at a guardian
//! that does not point back; [`Pairing::reconcile`] completes that link, and
//! the daemon runs it for every registered dependent on start.

use std::sync::Arc;

use serde::Serialize;

use safetynet_core::{ActorId, ActorPatch, FieldUpdate, Precondition, RemoteStore, StoreError};

use crate::error::PairingError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Linked {
    pub guardian: ActorId,
    pub dependent: ActorId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Unlinked,
    Consistent { partner: ActorId },
    /// The partner's half was missing and has been written.
    Completed { partner: ActorId },
    /// The partner is gone or paired elsewhere; the dangling half was removed.
    Cleared { partner: ActorId },
}

#[derive(Clone)]
pub struct Pairing {
    store: Arc<dyn RemoteStore>,
}

impl Pairing {
    pub fn new(store: Arc<dyn RemoteStore>) -> Self {
        Self { store }
    }

    /// Pair `guardian` with the dependent whose id is `code`.
    ///
    /// `NotFound` when no dependent matches; nothing is written in that case.
    pub async fn link(&self, guardian: &ActorId, code: &str) -> Result<Linked, PairingError> {
        let dependent_id = ActorId::from(code.trim());
        if dependent_id.0.is_empty() || &dependent_id == guardian {
            return Err(PairingError::NotFound {
                code: code.to_string(),
            });
        }

        let dependent = match self.store.get_actor(&dependent_id).await? {
            Some(actor) if actor.is_dependent() => actor,
            _ => {
                tracing::info!(guardian = %guardian, code, "pairing code did not match a dependent");
                return Err(PairingError::NotFound {
                    code: code.to_string(),
                });
            }
        };
        let guardian_actor = self
            .store
            .get_actor(guardian)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                id: guardian.clone(),
            })?;

        let linked = Linked {
            guardian: guardian.clone(),
            dependent: dependent_id.clone(),
        };
        for (side, partner) in [(&guardian_actor, &dependent_id), (&dependent, guardian)] {
            if !Precondition::LinkedToNoneOr(partner.clone()).holds(side) {
                return Err(PairingError::AlreadyLinked {
                    id: side.id.clone(),
                });
            }
        }
        if guardian_actor.linked_id.as_ref() == Some(&dependent_id)
            && dependent.linked_id.as_ref() == Some(guardian)
        {
            return Ok(linked);
        }

        if self.store.link_pair(guardian, &dependent_id).await? {
            tracing::info!(guardian = %guardian, dependent = %dependent_id, "pair linked in one transaction");
            return Ok(linked);
        }

        self.link_one_side(&dependent_id, guardian).await?;
        if let Err(err) = self.link_one_side(guardian, &dependent_id).await {
            if matches!(err, PairingError::AlreadyLinked { .. }) {
                self.store
                    .update_actor(&dependent_id, &ActorPatch::new().set(FieldUpdate::LinkedId(None)))
                    .await?;
            }
            return Err(err);
        }

        match self.reconcile(&dependent_id).await? {
            ReconcileOutcome::Consistent { .. } | ReconcileOutcome::Completed { .. } => {
                tracing::info!(guardian = %guardian, dependent = %dependent_id, "pair linked");
                Ok(linked)
            }
            ReconcileOutcome::Cleared { .. } | ReconcileOutcome::Unlinked => {
                Err(PairingError::AlreadyLinked { id: guardian.clone() })
            }
        }
    }

    /// Check both directions of `id`'s link and repair a half-written pair.
    pub async fn reconcile(&self, id: &ActorId) -> Result<ReconcileOutcome, PairingError> {
        let actor = self
            .store
            .get_actor(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
        let Some(partner_id) = actor.linked_id.clone() else {
            return Ok(ReconcileOutcome::Unlinked);
        };

        let partner = self.store.get_actor(&partner_id).await?;
        let partner_link = partner.as_ref().and_then(|p| p.linked_id.clone());
        match (partner, partner_link) {
            (Some(_), Some(back)) if &back == id => Ok(ReconcileOutcome::Consistent {
                partner: partner_id,
            }),
            (Some(_), None) => {
                let wrote = self
                    .store
                    .update_actor_if(
                        &partner_id,
                        &Precondition::LinkedToNoneOr(id.clone()),
                        &ActorPatch::new().set(FieldUpdate::LinkedId(Some(id.clone()))),
                    )
                    .await?;
                if wrote {
                    tracing::warn!(actor = %id, partner = %partner_id, "completed half-written pair");
                    Ok(ReconcileOutcome::Completed {
                        partner: partner_id,
                    })
                } else {
                    self.clear_dangling(id, partner_id).await
                }
            }
            _ => self.clear_dangling(id, partner_id).await,
        }
    }

    async fn link_one_side(&self, id: &ActorId, partner: &ActorId) -> Result<(), PairingError> {
        let wrote = self
            .store
            .update_actor_if(
                id,
                &Precondition::LinkedToNoneOr(partner.clone()),
                &ActorPatch::new().set(FieldUpdate::LinkedId(Some(partner.clone()))),
            )
            .await?;
        if !wrote {
            return Err(PairingError::AlreadyLinked { id: id.clone() });
        }
        Ok(())
    }

    async fn clear_dangling(
        &self,
        id: &ActorId,
        partner: ActorId,
    ) -> Result<ReconcileOutcome, PairingError> {
        tracing::warn!(actor = %id, partner = %partner, "removing dangling link");
        self.store
            .update_actor(id, &ActorPatch::new().set(FieldUpdate::LinkedId(None)))
            .await?;
        Ok(ReconcileOutcome::Cleared { partner })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use safetynet_core::memory::MemoryStore;
    use safetynet_core::{Actor, Role};

    async fn store_with(actors: Vec<Actor>, transactional: bool) -> Arc<MemoryStore> {
        let store = Arc::new(if transactional {
            MemoryStore::new()
        } else {
            MemoryStore::without_transactions()
        });
        for actor in actors {
            store.create_actor(actor).await.expect("create");
        }
        store
    }

    fn pair() -> Vec<Actor> {
        vec![
            Actor::new("g1", Role::Guardian, "g@example.com"),
            Actor::new("d1", Role::Dependent, "d@example.com"),
        ]
    }

    #[tokio::test]
    async fn relinking_the_same_pair_is_a_no_op() {
        let store = store_with(pair(), false).await;
        let pairing = Pairing::new(store.clone());
        pairing.link(&ActorId::from("g1"), "d1").await.expect("first");
        pairing.link(&ActorId::from("g1"), "d1").await.expect("second");
        assert_eq!(
            store.actor(&ActorId::from("d1")).unwrap().linked_id,
            Some(ActorId::from("g1"))
        );
    }

    #[tokio::test]
    async fn existing_pair_is_not_overwritten() {
        let mut actors = pair();
        actors.push(Actor::new("g2", Role::Guardian, "g2@example.com"));
        let store = store_with(actors, false).await;
        let pairing = Pairing::new(store.clone());
        pairing.link(&ActorId::from("g1"), "d1").await.expect("link");

        let err = pairing.link(&ActorId::from("g2"), "d1").await.unwrap_err();
        assert!(matches!(err, PairingError::AlreadyLinked { .. }));
        assert_eq!(store.actor(&ActorId::from("g2")).unwrap().linked_id, None);
        assert_eq!(
            store.actor(&ActorId::from("d1")).unwrap().linked_id,
            Some(ActorId::from("g1"))
        );
    }

    #[tokio::test]
    async fn guardian_code_is_not_found() {
        let store = store_with(pair(), true).await;
        let pairing = Pairing::new(store.clone());
        let err = pairing.link(&ActorId::from("d1"), "g1").await.unwrap_err();
        assert!(matches!(err, PairingError::NotFound { .. }));
        let err = pairing.link(&ActorId::from("g1"), "g1").await.unwrap_err();
        assert!(matches!(err, PairingError::NotFound { .. }));
    }

    #[tokio::test]
    async fn reconcile_clears_link_to_missing_partner() {
        let mut dependent = Actor::new("d1", Role::Dependent, "d@example.com");
        dependent.linked_id = Some(ActorId::from("ghost"));
        let store = store_with(vec![dependent], true).await;

        let outcome = Pairing::new(store.clone())
            .reconcile(&ActorId::from("d1"))
            .await
            .expect("reconcile");
        assert_eq!(
            outcome,
            ReconcileOutcome::Cleared {
                partner: ActorId::from("ghost")
            }
        );
        assert_eq!(store.actor(&ActorId::from("d1")).unwrap().linked_id, None);
    }
}
