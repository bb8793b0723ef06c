//! Geofence arrival detection.
//!
//! At most one flip of `destination.arrived` and one notification per
//! destination: the flip is a conditional write that only succeeds while the
//! same destination is still unarrived, so concurrent evaluations race on the
//! store, not on local state.

use std::sync::Arc;

use safetynet_core::{
    geo, Actor, ActorPatch, Coordinates, FieldUpdate, Notifier, Precondition, RemoteStore,
};
use serde::Serialize;

use crate::DetectError;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ArrivalOutcome {
    NoDestination,
    AlreadyArrived,
    Outside { distance_m: f64 },
    /// Inside the radius, but another evaluation flipped the flag first.
    LostRace { distance_m: f64 },
    Arrived { distance_m: f64, notified: bool },
}

impl ArrivalOutcome {
    pub fn flipped(&self) -> bool {
        matches!(self, ArrivalOutcome::Arrived { .. })
    }
}

#[derive(Clone)]
pub struct ArrivalDetector {
    store: Arc<dyn RemoteStore>,
    notifier: Notifier,
    radius_m: f64,
    title: String,
}

impl ArrivalDetector {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        notifier: Notifier,
        radius_m: f64,
        title: impl Into<String>,
    ) -> Self {
        Self {
            store,
            notifier,
            radius_m,
            title: title.into(),
        }
    }

    pub fn radius_m(&self) -> f64 {
        self.radius_m
    }

    /// Evaluate one sample against `actor`'s destination.
    ///
    /// Store errors on the flip propagate; a failed guardian lookup or push
    /// only costs the notification.
    pub async fn evaluate(
        &self,
        current: Coordinates,
        actor: &Actor,
    ) -> Result<ArrivalOutcome, DetectError> {
        let Some(dest) = actor.destination.as_ref() else {
            return Ok(ArrivalOutcome::NoDestination);
        };
        if dest.arrived {
            return Ok(ArrivalOutcome::AlreadyArrived);
        }

        let distance_m = geo::distance_m(current, dest.coords());
        if distance_m >= self.radius_m {
            return Ok(ArrivalOutcome::Outside { distance_m });
        }

        let flipped = self
            .store
            .update_actor_if(
                &actor.id,
                &Precondition::DestinationUnarrived(dest.coords()),
                &ActorPatch::new().set(FieldUpdate::DestinationArrived(true)),
            )
            .await?;
        if !flipped {
            tracing::debug!(actor = %actor.id, "arrival already recorded elsewhere");
            return Ok(ArrivalOutcome::LostRace { distance_m });
        }
        tracing::info!(
            actor = %actor.id,
            label = %dest.label,
            distance_m,
            "destination reached"
        );

        let guardian = match &actor.linked_id {
            Some(id) => match self.store.get_actor(id).await {
                Ok(found) => found,
                Err(err) => {
                    tracing::warn!(guardian = %id, error = %err, "guardian lookup failed; arrival not notified");
                    None
                }
            },
            None => None,
        };
        let body = format!("{} arrived at {}", actor.email, dest.label);
        let delivery = self
            .notifier
            .dispatch_to(guardian.as_ref(), &self.title, &body)
            .await;

        Ok(ArrivalOutcome::Arrived {
            distance_m,
            notified: delivery.attempted(),
        })
    }
}
